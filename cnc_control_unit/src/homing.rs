//! The homing-cycle state machine (spec §4.4, grbl `limits_go_home`).
//!
//! `HomingEngine::go_home` drives every axis in `cycle_mask` through the
//! seek/pull-off/locate sub-cycle sequence, consulting the axis-lock mask
//! the stepper reads every pulse, and commits `sys_position` once the
//! cycle completes. Only the realtime reset/safety-door/cycle-stop flags
//! can interrupt it, matching the source's "only the abort realtime
//! command can interrupt this process" note.

use cnc_common::axis::{
    corexy_set_virtual_axis, corexy_step_pin_mask, corexy_to_x_axis_steps, corexy_to_y_axis_steps,
    is_corexy_virtual_axis, step_pin_mask, A_MOTOR, AXIS_1, AXIS_2, B_MOTOR,
};
use cnc_common::consts::{
    HOMING_AXIS_LOCATE_SCALAR, HOMING_AXIS_SEARCH_SCALAR, HOMING_CYCLE_LINE_NUMBER, MAX_AXES,
    N_HOMING_LOCATE_CYCLE,
};
use cnc_common::error::{AlarmCode, RtExecState};
use cnc_common::settings::MachineSettings;
use heapless::Vec as HVec;
use tracing::{debug, warn};

use crate::collaborators::{PlanCondition, PlanLine, Planner, RealtimeDispatcher, Stepper};
use crate::limits::{limit_state, LimitPins};
use crate::machine::{MachineState, SysState};

/// Whether a forced-origin homing commit should be used instead of the
/// computed pull-off offset (spec §4.4 "Commit"). A compile-time toggle
/// in the source (`HOMING_FORCE_SET_ORIGIN`); carried here as a field so
/// it can vary per machine without a feature flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomingOptions {
    pub force_set_origin: bool,
}

/// Whether the machine uses the CoreXY kinematic coupling for its first
/// two axes (spec §3 invariant (v), §9 "CoreXY coupling").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kinematics {
    #[default]
    Cartesian,
    CoreXY,
}

enum InnerLoopOutcome {
    Completed,
    Failed(AlarmCode),
}

/// The homing engine (spec §4.4). Stateless across calls: each
/// `go_home` invocation owns its own sub-cycle loop and returns once the
/// cycle completes or fails.
pub struct HomingEngine {
    pub kinematics: Kinematics,
    pub options: HomingOptions,
}

impl HomingEngine {
    pub fn new(kinematics: Kinematics, options: HomingOptions) -> Self {
        Self { kinematics, options }
    }

    fn step_pin(&self, axis: usize) -> u8 {
        match self.kinematics {
            Kinematics::CoreXY => corexy_step_pin_mask(axis),
            Kinematics::Cartesian => step_pin_mask(axis),
        }
    }

    /// Homes every axis whose bit is set in `cycle_mask` in a single
    /// combined pass (spec §4.4 "Contract"). Preconditions: planner
    /// buffer empty, system not in ALARM, no reset pending — callers are
    /// expected to have checked these before invoking homing; this
    /// method only checks the realtime reset flag, matching grbl's sole
    /// `if (sys.abort) return;` guard at entry.
    #[allow(clippy::too_many_arguments)]
    pub fn go_home<P, T, R>(
        &self,
        machine: &mut MachineState,
        cycle_mask: u8,
        pins: &LimitPins,
        planner: &mut P,
        stepper: &mut T,
        rt: &mut R,
        mut sleep_ms: impl FnMut(u16),
    ) where
        P: Planner,
        T: Stepper,
        R: RealtimeDispatcher,
    {
        if rt.exec_state().contains(RtExecState::RESET) {
            return;
        }

        let n_axis = machine.n_axis();
        let settings = machine.settings.clone();

        let mut step_pin = [0u8; MAX_AXES];
        let mut search_travel = 0f64;
        for idx in 0..n_axis {
            step_pin[idx] = self.step_pin(idx);
            if cycle_mask & (1 << idx) != 0 {
                let candidate = HOMING_AXIS_SEARCH_SCALAR * -settings.max_travel[idx];
                search_travel = search_travel.max(candidate);
                if search_travel < HOMING_AXIS_LOCATE_SCALAR {
                    warn!(axis = idx, "max_travel too small to clear locate scalar");
                    machine.raise_alarm(AlarmCode::HomingFailTravel);
                    return;
                }
            }
        }

        machine.sys_state = SysState::Homing;

        // grbl's `do { ... } while (n_cycle-- > 0)` with `n_cycle` initialized
        // to `2*N_HOMING_LOCATE_CYCLE+1` executes the body `n_cycle+1` times
        // (a do-while post-decrements after running, so it always runs one
        // more time than the naive reading of the assignment suggests): for
        // the standard `N_HOMING_LOCATE_CYCLE = 1` this is 4 sub-cycles —
        // seek, pull-off, locate, pull-off — ending on a pull-off, matching
        // DESIGN.md's resolution of the `endstop_adj` open question.
        let total_subcycles = 2 * N_HOMING_LOCATE_CYCLE as u32 + 2;
        let mut approach = true;
        let mut travel = search_travel;
        let mut rate = settings.homing_seek_rate;

        for sub_cycle in 0..total_subcycles {
            let is_final_subcycle = sub_cycle == total_subcycles - 1;
            debug!(sub_cycle, approach, travel, rate, "homing sub-cycle start");

            let mut target: HVec<f64, MAX_AXES> = HVec::new();
            for idx in 0..n_axis {
                let _ = target.push(machine.position_mm(idx));
            }

            let mut n_active = 0u32;
            for idx in 0..n_axis {
                if cycle_mask & (1 << idx) == 0 {
                    continue;
                }
                n_active += 1;

                reset_position_for_axis(machine, self.kinematics, idx);

                let mut axis_offset = 0.0;
                if n_axis == 6 && is_final_subcycle && settings.endstop_adj[idx] > 0.0 {
                    axis_offset = settings.endstop_adj[idx];
                }

                let dir_negative = settings.homing_dir_mask & (1 << idx) != 0;
                target[idx] = match (dir_negative, approach) {
                    (true, true) => -travel,
                    (true, false) => travel + axis_offset,
                    (false, true) => travel,
                    (false, false) => -travel - axis_offset,
                };

                machine.lock_axis(idx, step_pin[idx]);
            }

            rate *= (n_active as f64).sqrt();

            planner.plan_buffer_line_system(PlanLine {
                target: target.clone(),
                rate_mm_per_min: rate,
                condition: PlanCondition::SYSTEM_MOTION | PlanCondition::NO_FEED_OVERRIDE,
                line_number: HOMING_CYCLE_LINE_NUMBER,
            });

            stepper.st_prep_buffer();
            stepper.st_wake_up();

            let outcome =
                self.run_inner_loop(machine, cycle_mask, &step_pin, approach, pins, stepper, rt);

            stepper.st_reset();

            match outcome {
                InnerLoopOutcome::Failed(code) => {
                    warn!(?code, "homing cycle failed");
                    machine.raise_alarm(code);
                    machine.sys_state = SysState::Alarm;
                    return;
                }
                InnerLoopOutcome::Completed => {}
            }

            sleep_ms(settings.homing_debounce_delay);

            approach = !approach;
            if approach {
                travel = settings.homing_pulloff * HOMING_AXIS_LOCATE_SCALAR;
                rate = settings.homing_feed_rate;
            } else {
                travel = settings.homing_pulloff;
                rate = settings.homing_seek_rate;
            }
        }

        self.commit(machine, cycle_mask, &settings);
        machine.sys_state = SysState::Idle;
        debug!(cycle_mask, "homing cycle complete");
    }

    #[allow(clippy::too_many_arguments)]
    fn run_inner_loop<T, R>(
        &self,
        machine: &mut MachineState,
        cycle_mask: u8,
        step_pin: &[u8; MAX_AXES],
        approach: bool,
        pins: &LimitPins,
        stepper: &mut T,
        rt: &mut R,
    ) -> InnerLoopOutcome
    where
        T: Stepper,
        R: RealtimeDispatcher,
    {
        let n_axis = machine.n_axis();
        loop {
            if approach {
                let sampled = limit_state(pins, machine.settings.flags, n_axis);
                for idx in 0..n_axis {
                    if machine.axis_lock(idx) & step_pin[idx] != 0 && sampled & (1 << idx) != 0 {
                        let clear_bits = if self.kinematics == Kinematics::CoreXY
                            && is_corexy_virtual_axis(idx)
                        {
                            step_pin_mask(A_MOTOR) | step_pin_mask(B_MOTOR)
                        } else {
                            step_pin[idx]
                        };
                        machine.clear_axis_bits(idx, clear_bits);
                    }
                }
            }

            stepper.st_prep_buffer();

            let exec = rt.exec_state();
            if exec.intersects(
                RtExecState::SAFETY_DOOR | RtExecState::RESET | RtExecState::CYCLE_STOP,
            ) {
                if exec.contains(RtExecState::RESET) {
                    return InnerLoopOutcome::Failed(AlarmCode::HomingFailReset);
                }
                if exec.contains(RtExecState::SAFETY_DOOR) {
                    return InnerLoopOutcome::Failed(AlarmCode::HomingFailDoor);
                }
                if !approach && limit_state(pins, machine.settings.flags, n_axis) & cycle_mask != 0
                {
                    return InnerLoopOutcome::Failed(AlarmCode::HomingFailPulloff);
                }
                if approach && exec.contains(RtExecState::CYCLE_STOP) {
                    return InnerLoopOutcome::Failed(AlarmCode::HomingFailApproach);
                }
                rt.clear_exec_state(RtExecState::CYCLE_STOP);
                return InnerLoopOutcome::Completed;
            }

            if !machine.any_lock_active() {
                return InnerLoopOutcome::Completed;
            }
        }
    }

    fn commit(&self, machine: &mut MachineState, cycle_mask: u8, settings: &MachineSettings) {
        let n_axis = machine.n_axis();
        for idx in 0..n_axis {
            if cycle_mask & (1 << idx) == 0 {
                continue;
            }
            let set_axis_position = if self.options.force_set_origin {
                0
            } else if settings.homing_dir_mask & (1 << idx) != 0 {
                ((settings.max_travel[idx] + settings.homing_pulloff) * settings.steps_per_mm[idx])
                    .round() as i32
            } else {
                (-settings.homing_pulloff * settings.steps_per_mm[idx]).round() as i32
            };

            if self.kinematics == Kinematics::CoreXY && is_corexy_virtual_axis(idx) {
                corexy_set_virtual_axis(&mut machine.sys_position, idx, set_axis_position);
            } else {
                machine.sys_position[idx] = set_axis_position;
            }
        }
    }
}

fn reset_position_for_axis(machine: &mut MachineState, kinematics: Kinematics, axis: usize) {
    if kinematics == Kinematics::CoreXY {
        match axis {
            AXIS_1 => {
                let off_axis = corexy_to_y_axis_steps(&machine.sys_position);
                machine.sys_position[A_MOTOR] = off_axis;
                machine.sys_position[B_MOTOR] = -off_axis;
            }
            AXIS_2 => {
                let off_axis = corexy_to_x_axis_steps(&machine.sys_position);
                machine.sys_position[A_MOTOR] = off_axis;
                machine.sys_position[B_MOTOR] = off_axis;
            }
            other => machine.sys_position[other] = 0,
        }
    } else {
        machine.sys_position[axis] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{new_pair, ScriptedPin, SimPlanner};
    use cnc_common::settings::MachineSettings;

    fn settings_3axis() -> MachineSettings {
        let mut s = MachineSettings::default();
        s.n_axis = 3;
        s.steps_per_mm[0] = 80.0;
        s.max_travel[0] = -200.0;
        s.homing_pulloff = 1.0;
        s.homing_dir_mask = 0b001; // X seeks toward negative
        s
    }

    #[test]
    fn single_axis_home_commits_expected_position() {
        let settings = settings_3axis();
        let mut machine = MachineState::new(settings);
        let engine = HomingEngine::new(Kinematics::Cartesian, HomingOptions::default());

        let mut pins = LimitPins::unbound(3);
        // Trips on the 3rd approach tick (seek), releases for the pull-off
        // check, trips again on the 2nd locate tick, releases for the
        // final pull-off check.
        pins.min[0] = Some(Box::new(ScriptedPin::new(vec![
            false, false, true, false, false, true, false,
        ])));

        let mut planner = SimPlanner::default();
        let (mut stepper, mut rt) = new_pair(10);

        engine.go_home(&mut machine, 0b001, &pins, &mut planner, &mut stepper, &mut rt, |_| {});

        assert_eq!(machine.alarm(), None);
        let expected = ((-200.0f64 + 1.0) * 80.0).round() as i32;
        assert_eq!(machine.sys_position[0], expected);
    }

    #[test]
    fn approach_exhausted_without_trigger_raises_approach_alarm() {
        let settings = settings_3axis();
        let mut machine = MachineState::new(settings);
        let engine = HomingEngine::new(Kinematics::Cartesian, HomingOptions::default());

        let mut pins = LimitPins::unbound(3);
        pins.min[0] = Some(Box::new(ScriptedPin::new(vec![false])));

        let mut planner = SimPlanner::default();
        // Small block size: the switch never trips, so the seek block
        // exhausts its planned segments quickly and the stepper reports
        // CYCLE_STOP before any lock bit clears.
        let (mut stepper, mut rt) = new_pair(4);

        engine.go_home(&mut machine, 0b001, &pins, &mut planner, &mut stepper, &mut rt, |_| {});

        assert_eq!(machine.alarm(), Some(AlarmCode::HomingFailApproach));
    }

    #[test]
    fn corexy_single_axis_home_locks_both_motors_and_commits_virtual_position() {
        let settings = settings_3axis();
        let mut machine = MachineState::new(settings);
        let engine = HomingEngine::new(Kinematics::CoreXY, HomingOptions::default());

        let mut pins = LimitPins::unbound(3);
        // AXIS_1 (virtual X) trips on the 3rd approach tick, same cadence
        // as the Cartesian case; AXIS_2/AXIS_3 are not in cycle_mask so
        // their pins stay absent.
        pins.min[AXIS_1] = Some(Box::new(ScriptedPin::new(vec![
            false, false, true, false, false, true, false,
        ])));

        let mut planner = SimPlanner::default();
        let (mut stepper, mut rt) = new_pair(10);

        engine.go_home(&mut machine, 1 << AXIS_1, &pins, &mut planner, &mut stepper, &mut rt, |_| {});

        assert_eq!(machine.alarm(), None);
        // Invariant (v): locking/unlocking the virtual axis must move both
        // motors atomically, so both physical bits end up clear together.
        assert_eq!(machine.axis_lock(A_MOTOR), 0);
        assert_eq!(machine.axis_lock(B_MOTOR), 0);

        let expected = ((-200.0f64 + 1.0) * 80.0).round() as i32;
        assert_eq!(corexy_to_x_axis_steps(&machine.sys_position), expected);
        // The off-axis (Y) virtual coordinate must be undisturbed at 0.
        assert_eq!(corexy_to_y_axis_steps(&machine.sys_position), 0);
    }

    #[test]
    fn travel_too_small_raises_travel_alarm_without_motion() {
        let mut settings = settings_3axis();
        settings.max_travel[0] = -0.5; // 1.5 * 0.5 = 0.75 < locate scalar 5.0
        let mut machine = MachineState::new(settings);
        let engine = HomingEngine::new(Kinematics::Cartesian, HomingOptions::default());
        let pins = LimitPins::unbound(3);
        let mut planner = SimPlanner::default();
        let (mut stepper, mut rt) = new_pair(10);

        let before = machine.sys_position.clone();
        engine.go_home(&mut machine, 0b001, &pins, &mut planner, &mut stepper, &mut rt, |_| {});

        assert_eq!(machine.alarm(), Some(AlarmCode::HomingFailTravel));
        assert_eq!(machine.sys_position, before);
    }
}
