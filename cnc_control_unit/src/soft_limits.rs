//! Soft-limit guard (spec §4.3, grbl `limits_soft_check`).
//!
//! Runs inline in the planner's entry path for every non-system motion,
//! after coordinate transforms. Unlike the hard-limit watcher this path
//! preserves position: it requests a controlled stop via feed hold before
//! raising the alarm.

use cnc_common::consts::MAX_AXES;
use cnc_common::error::{AlarmCode, RtExecState};
use cnc_common::settings::MachineSettings;
use heapless::Vec as HVec;
use tracing::warn;

use crate::collaborators::{Planner, RealtimeDispatcher, Stepper};
use crate::limits::system_reset;
use crate::machine::{MachineState, SysState};

/// The workspace envelope for one axis: `[lo, hi]` in machine-coordinate
/// mm, shifted inward by the pull-off distance on the homed side (spec
/// §4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisEnvelope {
    pub lo: f64,
    pub hi: f64,
}

/// Computes the per-axis envelope from the settings record.
///
/// When `homing_dir_mask` bit `i` is clear, the switch sits on the
/// positive side and the envelope is `[max_travel[i] + pull_off, -pull_off]`;
/// when set, the switch sits on the negative side and the interval is
/// mirrored.
pub fn axis_envelope(settings: &MachineSettings, axis: usize) -> AxisEnvelope {
    let max_travel = settings.max_travel[axis];
    let pull_off = settings.homing_pulloff;
    if settings.homing_dir_mask & (1 << axis) == 0 {
        AxisEnvelope {
            lo: max_travel + pull_off,
            hi: -pull_off,
        }
    } else {
        AxisEnvelope {
            lo: pull_off,
            hi: -max_travel - pull_off,
        }
    }
}

/// Returns the bitmask of axes whose `target` coordinate falls outside
/// its configured envelope (grbl `system_check_travel_limits`).
pub fn check_travel_limits(settings: &MachineSettings, target: &[f64]) -> u8 {
    let mut violations = 0u8;
    for axis in 0..settings.n_axis as usize {
        let env = axis_envelope(settings, axis);
        let (lo, hi) = if env.lo <= env.hi {
            (env.lo, env.hi)
        } else {
            (env.hi, env.lo)
        };
        let value = target.get(axis).copied().unwrap_or(0.0);
        if value < lo || value > hi {
            violations |= 1 << axis;
        }
    }
    violations
}

/// The soft-limit entry point (spec §4.3 `soft_check`).
pub struct SoftLimitGuard;

impl SoftLimitGuard {
    /// Checks `target` against the configured envelope. If any axis is
    /// out of bounds: latches the soft-limit status flag, requests a feed
    /// hold and waits for IDLE if a cycle is active, then issues a system
    /// reset and raises the soft-limit alarm.
    ///
    /// `poll_idle` is called once per wait iteration so the caller can
    /// pump its realtime dispatcher / cooperative scheduler; it returns
    /// `true` once `sys_state` has reached `Idle`, or an abort was
    /// observed (in which case the wait terminates early, mirroring
    /// grbl's `if (sys.abort) { return; }` check inside the feed-hold wait
    /// loop).
    pub fn soft_check<P, T, R>(
        &self,
        machine: &mut MachineState,
        target: &HVec<f64, MAX_AXES>,
        planner: &mut P,
        stepper: &mut T,
        rt: &mut R,
        mut poll_idle: impl FnMut(&mut MachineState, &mut R) -> bool,
    ) where
        P: Planner,
        T: Stepper,
        R: RealtimeDispatcher,
    {
        if !machine.settings.soft_limits_enabled() {
            return;
        }
        let violations = check_travel_limits(&machine.settings, target);
        if violations == 0 {
            return;
        }

        warn!(violations, "soft limit violated");
        machine.set_soft_limit_flag();
        if machine.sys_state == SysState::Cycle {
            machine.set_rt_flags(RtExecState::FEED_HOLD);
            loop {
                if rt.exec_state().contains(RtExecState::RESET) {
                    return;
                }
                if poll_idle(machine, rt) {
                    break;
                }
            }
        }

        system_reset(machine, planner, stepper, rt);
        machine.raise_alarm(AlarmCode::SoftLimit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{new_pair, SimPlanner};

    fn settings_homed_positive_x() -> MachineSettings {
        let mut s = MachineSettings::default();
        s.n_axis = 3;
        s.max_travel[0] = -200.0;
        s.homing_pulloff = 1.0;
        s.homing_dir_mask = 0; // switch on positive side
        s
    }

    #[test]
    fn envelope_shifted_inward_by_pulloff_on_positive_side() {
        let s = settings_homed_positive_x();
        let env = axis_envelope(&s, 0);
        assert_eq!(env.lo, -199.0);
        assert_eq!(env.hi, -1.0);
    }

    #[test]
    fn envelope_mirrored_when_homed_negative_side() {
        let mut s = settings_homed_positive_x();
        s.homing_dir_mask = 0b001;
        let env = axis_envelope(&s, 0);
        assert_eq!(env.lo, 1.0);
        assert_eq!(env.hi, 199.0);
    }

    #[test]
    fn target_outside_envelope_is_flagged() {
        let s = settings_homed_positive_x();
        let target = [1.0, 0.0, 0.0];
        let violations = check_travel_limits(&s, &target);
        assert_eq!(violations & 0b001, 0b001);
    }

    #[test]
    fn target_inside_envelope_is_not_flagged() {
        let s = settings_homed_positive_x();
        let target = [-50.0, 0.0, 0.0];
        assert_eq!(check_travel_limits(&s, &target), 0);
    }

    #[test]
    fn soft_check_sets_the_status_flag_ahead_of_the_alarm() {
        let mut s = settings_homed_positive_x();
        s.flags |= cnc_common::settings::MachineFlags::SOFT_LIMITS_ENABLE;
        let mut machine = MachineState::new(s);
        let mut target = HVec::new();
        target.push(1.0).unwrap();
        target.push(0.0).unwrap();
        target.push(0.0).unwrap();

        let mut planner = SimPlanner::default();
        let (mut stepper, mut rt) = new_pair(10);

        assert!(!machine.soft_limit_flag());
        SoftLimitGuard.soft_check(&mut machine, &target, &mut planner, &mut stepper, &mut rt, |_, _| true);

        // sys_state starts Idle, so no feed-hold wait is requested, but the
        // status flag is still latched before the reset/alarm, same as
        // when a cycle is active (grbl sets `sys.soft_limit` unconditionally).
        assert!(machine.soft_limit_flag());
        assert_eq!(machine.alarm(), Some(AlarmCode::SoftLimit));
    }
}
