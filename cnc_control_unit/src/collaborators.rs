//! Trait seams for the out-of-scope collaborators named in spec §2/§6:
//! the motion planner, the step-segment preparator/stepper driver, and the
//! realtime protocol dispatcher. This crate only ever calls through these
//! traits; [`crate::sim`] is the one place concrete, software-only
//! implementations live.

use bitflags::bitflags;
use cnc_common::consts::MAX_AXES;
use heapless::Vec as HVec;

bitflags! {
    /// Per-line motion conditions a homing/jog move is tagged with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PlanCondition: u8 {
        /// Bypasses the normal queue; used for homing and jogging moves
        /// that must not wait behind queued program motion.
        const SYSTEM_MOTION    = 0x01;
        /// Rapid/seek move: feed-rate override does not apply.
        const NO_FEED_OVERRIDE = 0x02;
    }
}

/// A single line handed to the planner: a target position per axis (in
/// machine steps) plus the rate and condition flags under which to reach
/// it. Homing moves are always [`PlanCondition::SYSTEM_MOTION`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlanLine {
    pub target: HVec<f64, MAX_AXES>,
    pub rate_mm_per_min: f64,
    pub condition: PlanCondition,
    pub line_number: i32,
}

/// The out-of-scope trajectory planner (spec §6 "Planner").
pub trait Planner {
    /// Queues a normal (program) motion line.
    fn plan_buffer_line(&mut self, line: PlanLine);

    /// Queues a privileged line that bypasses the ordinary queue —
    /// the entry point homing and limit-recovery moves use (spec §6:
    /// "a privileged entry point for system motion that bypasses the
    /// ordinary line queue").
    fn plan_buffer_line_system(&mut self, line: PlanLine) {
        self.plan_buffer_line(line);
    }

    /// True if the planner's buffer is empty (used to detect a homing
    /// sub-cycle's completion alongside axis-lock state).
    fn is_buffer_empty(&self) -> bool;

    /// Discards all buffered motion (used on reset/alarm).
    fn reset(&mut self);
}

/// The out-of-scope step-segment preparator / stepper driver (spec §6
/// "Stepper").
pub trait Stepper {
    /// Recomputes step segments from the planner's buffer; must be called
    /// after queuing new motion and whenever the axis-lock mask changes.
    fn st_prep_buffer(&mut self);

    /// Starts or resumes step pulse generation.
    fn st_wake_up(&mut self);

    /// Halts step pulse generation immediately (used on alarm/limit trip).
    fn st_go_idle(&mut self);

    /// Resets the stepper subsystem's internal segment buffer.
    fn st_reset(&mut self);

    /// Current machine position in steps, one entry per axis.
    fn position(&self) -> HVec<i32, MAX_AXES>;

    /// True once the stepper has finished executing all prepared segments
    /// and gone idle (used to detect a homing sub-cycle's completion).
    fn is_idle(&self) -> bool;
}

/// The out-of-scope realtime protocol dispatcher (spec §6
/// "RealtimeDispatcher"): the layer that would otherwise deliver
/// `RtExecState` bits from an interrupt or wire protocol. This crate only
/// asks it whether an abort condition is currently latched.
pub trait RealtimeDispatcher {
    fn exec_state(&self) -> cnc_common::error::RtExecState;
    fn clear_exec_state(&mut self, bits: cnc_common::error::RtExecState);
}
