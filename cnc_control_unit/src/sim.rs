//! Software-only collaborator implementations for tests and the demo
//! binary (spec §6 "exercised only through trait-bounded collaborator
//! contracts") — enough behavior to drive a caller through real control
//! flow, no physical model underneath.

use std::cell::Cell;
use std::rc::Rc;

use cnc_common::consts::MAX_AXES;
use cnc_common::error::RtExecState;
use heapless::Vec as HVec;

use crate::collaborators::{PlanLine, Planner, RealtimeDispatcher, Stepper};
use crate::limits::LimitPin;

/// The realtime flag register [`SimStepper`] and [`SimRealtimeDispatcher`]
/// share, mirroring the single `sys.rt_exec_state` byte interrupt contexts
/// and the foreground both touch on the real target.
#[derive(Clone, Default)]
pub struct SharedRtFlags(Rc<Cell<RtExecState>>);

impl SharedRtFlags {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(RtExecState::empty())))
    }

    pub fn set(&self, bits: RtExecState) {
        self.0.set(self.0.get() | bits);
    }

    pub fn get(&self) -> RtExecState {
        self.0.get()
    }

    pub fn clear(&self, bits: RtExecState) {
        self.0.set(self.0.get() & !bits);
    }
}

/// Records every buffered line without generating any real step segments.
#[derive(Default)]
pub struct SimPlanner {
    pub lines: Vec<PlanLine>,
    pub reset_count: u32,
}

impl Planner for SimPlanner {
    fn plan_buffer_line(&mut self, line: PlanLine) {
        self.lines.push(line);
    }

    fn is_buffer_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn reset(&mut self) {
        self.lines.clear();
        self.reset_count += 1;
    }
}

/// Counts down a fixed number of "segments" per planned block and raises
/// [`RtExecState::CYCLE_STOP`] on the shared register once a block is
/// exhausted, standing in for the real stepper ISR's block-completion
/// signal.
pub struct SimStepper {
    block_size: u32,
    segments_remaining: u32,
    position: HVec<i32, MAX_AXES>,
    flags: SharedRtFlags,
}

impl SimStepper {
    pub fn new(block_size: u32, flags: SharedRtFlags) -> Self {
        Self {
            block_size,
            segments_remaining: block_size,
            position: HVec::new(),
            flags,
        }
    }
}

impl Stepper for SimStepper {
    fn st_prep_buffer(&mut self) {
        if self.segments_remaining == 0 {
            self.flags.set(RtExecState::CYCLE_STOP);
            return;
        }
        self.segments_remaining -= 1;
        if self.segments_remaining == 0 {
            self.flags.set(RtExecState::CYCLE_STOP);
        }
    }

    fn st_wake_up(&mut self) {
        self.segments_remaining = self.block_size;
        self.flags.clear(RtExecState::CYCLE_STOP);
    }

    fn st_go_idle(&mut self) {
        self.segments_remaining = 0;
    }

    fn st_reset(&mut self) {
        self.segments_remaining = 0;
    }

    fn position(&self) -> HVec<i32, MAX_AXES> {
        self.position.clone()
    }

    fn is_idle(&self) -> bool {
        self.segments_remaining == 0
    }
}

/// A dispatcher backed by the same flag register [`SimStepper`] writes
/// into, so a simulated block completion is visible exactly as the real
/// ISR's `CYCLE_STOP` bit would be.
pub struct SimRealtimeDispatcher {
    flags: SharedRtFlags,
}

impl SimRealtimeDispatcher {
    pub fn new(flags: SharedRtFlags) -> Self {
        Self { flags }
    }
}

impl RealtimeDispatcher for SimRealtimeDispatcher {
    fn exec_state(&self) -> RtExecState {
        self.flags.get()
    }

    fn clear_exec_state(&mut self, bits: RtExecState) {
        self.flags.clear(bits);
    }
}

/// Builds a [`SimStepper`]/[`SimRealtimeDispatcher`] pair sharing one flag
/// register, `block_size` segments per planned block.
pub fn new_pair(block_size: u32) -> (SimStepper, SimRealtimeDispatcher) {
    let flags = SharedRtFlags::new();
    (
        SimStepper::new(block_size, flags.clone()),
        SimRealtimeDispatcher::new(flags),
    )
}

/// A limit pin whose *engaged* state follows a fixed script, one entry
/// consumed per `read_raw` call; once the script is exhausted, the last
/// entry repeats. Lets a caller dictate exactly which homing sub-cycle
/// tick sees a switch trip, without modeling real travel distance.
pub struct ScriptedPin {
    script: Vec<bool>,
    next: Cell<usize>,
}

impl ScriptedPin {
    pub fn new(script: Vec<bool>) -> Self {
        Self {
            script,
            next: Cell::new(0),
        }
    }
}

impl LimitPin for ScriptedPin {
    fn read_raw(&self) -> bool {
        let i = self.next.get();
        let engaged = *self
            .script
            .get(i)
            .unwrap_or_else(|| self.script.last().unwrap_or(&false));
        self.next.set(i + 1);
        !engaged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::PlanCondition;

    #[test]
    fn planner_records_lines_and_resets() {
        let mut planner = SimPlanner::default();
        planner.plan_buffer_line(PlanLine {
            target: HVec::new(),
            rate_mm_per_min: 100.0,
            condition: PlanCondition::empty(),
            line_number: -1,
        });
        assert!(!planner.is_buffer_empty());
        planner.reset();
        assert!(planner.is_buffer_empty());
        assert_eq!(planner.reset_count, 1);
    }

    #[test]
    fn stepper_signals_cycle_stop_after_block_size_preps() {
        let (mut stepper, rt) = new_pair(3);
        stepper.st_wake_up();
        for _ in 0..2 {
            stepper.st_prep_buffer();
            assert!(!rt.exec_state().contains(RtExecState::CYCLE_STOP));
        }
        stepper.st_prep_buffer();
        assert!(rt.exec_state().contains(RtExecState::CYCLE_STOP));
    }

    #[test]
    fn waking_up_clears_cycle_stop_and_resets_budget() {
        let (mut stepper, rt) = new_pair(1);
        stepper.st_wake_up();
        stepper.st_prep_buffer();
        assert!(rt.exec_state().contains(RtExecState::CYCLE_STOP));
        stepper.st_wake_up();
        assert!(!rt.exec_state().contains(RtExecState::CYCLE_STOP));
    }
}
