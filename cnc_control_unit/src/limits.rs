//! Limit-pin sampling and the hard-limit watcher (spec §4.1/§4.2).
//!
//! Mirrors `grbl/limits.c`'s `limits_get_state`/`ramps_hard_limit` pair,
//! generalized from compile-time `N_AXIS`/`#ifdef MAX_LIMIT_*` guards to
//! the runtime `n_axis` bound and `Option`-per-pin modeling the design
//! note "model limit inputs as an array of optional bindings".

use cnc_common::consts::MAX_AXES;
use cnc_common::settings::MachineFlags;
use heapless::Vec as HVec;
use tracing::warn;

use crate::collaborators::{Planner, RealtimeDispatcher, Stepper};
use crate::machine::{MachineState, SysState};
use cnc_common::error::AlarmCode;

/// A single physical limit-switch input. Absent bindings (a pin that
/// doesn't exist on a given board) sample as "not engaged" — the runtime
/// form of grbl's `#ifdef MAX_LIMIT_PORT(n)` guards.
pub trait LimitPin {
    /// Raw pin read, before polarity normalization. `true` = asserted.
    fn read_raw(&self) -> bool;
}

/// The two independent physical switch sets (min/max) per axis, each a
/// fixed-capacity array of optional pin bindings (spec §4.1).
pub struct LimitPins {
    pub min: HVec<Option<Box<dyn LimitPin>>, MAX_AXES>,
    pub max: HVec<Option<Box<dyn LimitPin>>, MAX_AXES>,
}

impl LimitPins {
    /// Builds an all-absent pin set for `n_axis` axes (every bit samples
    /// as not-engaged until pins are bound).
    pub fn unbound(n_axis: usize) -> Self {
        let mut min = HVec::new();
        let mut max = HVec::new();
        for _ in 0..n_axis {
            let _ = min.push(None);
            let _ = max.push(None);
        }
        Self { min, max }
    }

    /// Normalizes one physical set into a per-axis engaged bitmask.
    ///
    /// Switches are wired normally-high with internal pull-ups (or
    /// normally-low with external pull-downs): a raw read is inverted
    /// first, then the per-set invert mask (if any) is applied.
    fn set_state(set: &HVec<Option<Box<dyn LimitPin>>, MAX_AXES>, invert_mask: u8) -> u8 {
        let mut state = 0u8;
        for (idx, pin) in set.iter().enumerate() {
            let raw = pin.as_ref().is_some_and(|p| p.read_raw());
            let mut engaged = !raw;
            if invert_mask & (1 << idx) != 0 {
                engaged = !engaged;
            }
            if engaged {
                state |= 1 << idx;
            }
        }
        state
    }
}

/// Reads and normalizes the limit-pin state into a per-axis engaged
/// bitmask (spec §4.1). Bits `>= n_axis` are always zero.
pub fn limit_state(pins: &LimitPins, flags: MachineFlags, n_axis: usize) -> u8 {
    let max_active = LimitPins::set_state(&pins.max, 0);
    let min_active = LimitPins::set_state(&pins.min, 0);
    let unused_bits = 0xffu8 << n_axis;

    let combined = if flags.contains(MachineFlags::INVERT_LIMIT_PINS) {
        !((max_active & min_active) | unused_bits)
    } else {
        max_active | min_active
    };
    combined & !unused_bits
}

/// Reacts to limit-pin edge events when hard limits are enabled (spec
/// §4.2, grbl `ramps_hard_limit`).
///
/// `debounce_resample` is the runtime form of grbl's compile-time
/// `HARD_LIMIT_FORCE_STATE_CHECK` toggle: when set, a fresh
/// `limit_state()` sample must show engagement before the watcher acts,
/// dropping spurious edges the interrupt line itself can't filter.
pub struct HardLimitWatcher {
    pub debounce_resample: bool,
}

impl HardLimitWatcher {
    pub fn new(debounce_resample: bool) -> Self {
        Self { debounce_resample }
    }

    /// Handles one limit-pin edge interrupt.
    pub fn on_edge<P: Planner, T: Stepper, R: RealtimeDispatcher>(
        &self,
        machine: &mut MachineState,
        pins: &LimitPins,
        planner: &mut P,
        stepper: &mut T,
        rt: &mut R,
    ) {
        if !machine.settings.hard_limits_enabled() {
            return;
        }
        // Homing owns the pins; an alarm is already latched.
        if machine.sys_state == SysState::Alarm || machine.sys_state == SysState::Homing {
            return;
        }
        if machine.alarm().is_some() {
            return;
        }
        if self.debounce_resample {
            let n_axis = machine.n_axis();
            if limit_state(pins, machine.settings.flags, n_axis) == 0 {
                return;
            }
        }

        warn!("hard limit triggered, issuing system reset");
        system_reset(machine, planner, stepper, rt);
        machine.raise_alarm(AlarmCode::HardLimit);
    }
}

/// Kills the stepper, flushes the planner, and clears the exec-state flag
/// register — the shared "mc_reset" action used by both the hard-limit
/// watcher and the soft-limit guard.
pub(crate) fn system_reset<P: Planner, T: Stepper, R: RealtimeDispatcher>(
    machine: &MachineState,
    planner: &mut P,
    stepper: &mut T,
    rt: &mut R,
) {
    stepper.st_go_idle();
    stepper.st_reset();
    planner.reset();
    rt.clear_exec_state(rt.exec_state());
    let _ = machine;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPin(bool);
    impl LimitPin for FixedPin {
        fn read_raw(&self) -> bool {
            self.0
        }
    }

    fn pins_with_min_engaged(n_axis: usize, axis: usize) -> LimitPins {
        let mut pins = LimitPins::unbound(n_axis);
        // Normally-high with pull-up: engaged reads as raw low (0).
        pins.min[axis] = Some(Box::new(FixedPin(false)));
        pins
    }

    #[test]
    fn absent_pins_sample_as_not_engaged() {
        let pins = LimitPins::unbound(3);
        assert_eq!(limit_state(&pins, MachineFlags::empty(), 3), 0);
    }

    #[test]
    fn or_combination_reports_either_set_engaged() {
        let pins = pins_with_min_engaged(3, 1);
        assert_eq!(limit_state(&pins, MachineFlags::empty(), 3), 0b010);
    }

    #[test]
    fn and_combination_requires_both_sets_under_global_invert() {
        let mut pins = LimitPins::unbound(3);
        pins.min[0] = Some(Box::new(FixedPin(false))); // engaged
        // max[0] absent -> not engaged, so AND should be false for axis 0.
        let flags = MachineFlags::INVERT_LIMIT_PINS;
        assert_eq!(limit_state(&pins, flags, 3) & 0b001, 0);

        pins.max[0] = Some(Box::new(FixedPin(false))); // engaged too
        assert_eq!(limit_state(&pins, flags, 3) & 0b001, 0b001);
    }

    #[test]
    fn unused_bits_above_n_axis_are_forced_zero() {
        let mut pins = LimitPins::unbound(6);
        for i in 0..6 {
            pins.min[i] = Some(Box::new(FixedPin(false)));
        }
        let state = limit_state(&pins, MachineFlags::empty(), 3);
        assert_eq!(state, 0b0000_0111);
    }
}
