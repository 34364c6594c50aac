//! The machine-state aggregate (spec §3 "Machine position"/"Axis-lock
//! mask"/"Realtime flags", §9 design note "encapsulate in a single
//! machine state object").
//!
//! Fields the step timer and limit-pin interrupts touch concurrently with
//! the foreground (`homing_axis_lock`, the realtime-flag register, the
//! alarm register) are `Atomic*`-backed per spec §5; `sys_position` and
//! the settings record are foreground-only, mutated only while the
//! stepper is idle.

use std::sync::atomic::{AtomicU8, Ordering};

use cnc_common::axis::step_pin_mask;
use cnc_common::consts::MAX_AXES;
use cnc_common::error::{AlarmCode, RtExecState};
use cnc_common::settings::MachineSettings;
use heapless::Vec as HVec;

// Axis indices are packed one-bit-per-axis into u8 masks (cycle_mask,
// step/dir/limit pin masks, the axis-lock byte); this core has no path
// that would still work past 8 axes.
static_assertions::const_assert!(MAX_AXES <= 8);

/// Coarse machine lifecycle state (spec §5 "discipline that replaces
/// locks"). Deliberately `#[non_exhaustive]`: a fuller controller would
/// add states this core doesn't need to name (e.g. `Jog`).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysState {
    Idle,
    Homing,
    Alarm,
    Cycle,
    Hold,
}

/// The process-wide aggregate this core operates on: settings, position,
/// axis lock, realtime flags, alarm cause, and lifecycle state.
pub struct MachineState {
    pub settings: MachineSettings,
    /// `sys_position[i]` in step units, one entry per configured axis.
    pub sys_position: HVec<i32, MAX_AXES>,
    /// Per-axis step-pin bitmask; the stepper gates pulses on axis i when
    /// `homing_axis_lock[i] & step_pin_mask(i) == 0`.
    homing_axis_lock: HVec<AtomicU8, MAX_AXES>,
    rt_flags: AtomicU8,
    /// `0` = no alarm; otherwise `1 + AlarmCode` discriminant.
    alarm: AtomicU8,
    pub sys_state: SysState,
    /// Set by [`crate::soft_limits::SoftLimitGuard::soft_check`] the
    /// instant a target is found outside the configured envelope, ahead of
    /// the feed-hold wait and the eventual alarm (spec §4.3 step 1, grbl
    /// `sys.soft_limit`). Distinct from the alarm register: a status bit
    /// observable for the duration of the controlled stop, not just after
    /// it completes.
    soft_limit: bool,
}

impl MachineState {
    pub fn new(settings: MachineSettings) -> Self {
        let n = settings.n_axis as usize;
        let mut sys_position = HVec::new();
        let mut homing_axis_lock = HVec::new();
        for _ in 0..n {
            let _ = sys_position.push(0);
            let _ = homing_axis_lock.push(AtomicU8::new(0));
        }
        Self {
            settings,
            sys_position,
            homing_axis_lock,
            rt_flags: AtomicU8::new(0),
            alarm: AtomicU8::new(0),
            sys_state: SysState::Idle,
            soft_limit: false,
        }
    }

    pub fn n_axis(&self) -> usize {
        self.settings.n_axis as usize
    }

    // ─── Axis lock (interrupt-visible) ─────────────────────────────

    pub fn lock_axis(&self, i: usize, mask: u8) {
        self.homing_axis_lock[i].store(mask, Ordering::Release);
    }

    pub fn clear_axis_bits(&self, i: usize, bits: u8) {
        self.homing_axis_lock[i].fetch_and(!bits, Ordering::AcqRel);
    }

    pub fn axis_lock(&self, i: usize) -> u8 {
        self.homing_axis_lock[i].load(Ordering::Acquire)
    }

    /// True once every locked axis has had its step-pin bit cleared
    /// (spec §4.4 inner supervision loop exit condition).
    pub fn all_locks_clear(&self) -> bool {
        (0..self.n_axis()).all(|i| self.axis_lock(i) & step_pin_mask(i) == 0)
    }

    /// True if any axis-lock byte is still non-zero (grbl
    /// `axislock_active`: a raw non-zero check, not masked to a single
    /// bit — on CoreXY a virtual axis's lock byte carries both motor
    /// bits and must go fully to zero, not just its own bit).
    pub fn any_lock_active(&self) -> bool {
        (0..self.n_axis()).any(|i| self.axis_lock(i) != 0)
    }

    /// Current axis position in mm, converted from `sys_position` via
    /// the settings record's steps-per-mm (spec §3 "planner consumes a
    /// float target in mm").
    pub fn position_mm(&self, i: usize) -> f64 {
        self.sys_position[i] as f64 / self.settings.steps_per_mm[i]
    }

    // ─── Realtime flags (interrupt-visible) ────────────────────────

    pub fn set_rt_flags(&self, bits: RtExecState) {
        self.rt_flags.fetch_or(bits.bits(), Ordering::AcqRel);
    }

    pub fn rt_flags(&self) -> RtExecState {
        RtExecState::from_bits_truncate(self.rt_flags.load(Ordering::Acquire))
    }

    pub fn clear_rt_flags(&self, bits: RtExecState) {
        self.rt_flags.fetch_and(!bits.bits(), Ordering::AcqRel);
    }

    // ─── Alarm register ─────────────────────────────────────────────

    pub fn raise_alarm(&mut self, code: AlarmCode) {
        self.alarm.store(1 + code as u8, Ordering::Release);
        self.sys_state = SysState::Alarm;
    }

    pub fn alarm(&self) -> Option<AlarmCode> {
        match self.alarm.load(Ordering::Acquire) {
            0 => None,
            n => Some(alarm_from_u8(n - 1)),
        }
    }

    pub fn clear_alarm(&mut self) {
        self.alarm.store(0, Ordering::Release);
    }

    // ─── Soft-limit status flag ─────────────────────────────────────

    /// Latches the soft-limit status flag (spec §4.3 step 1), ahead of
    /// any feed-hold wait and the eventual alarm.
    pub fn set_soft_limit_flag(&mut self) {
        self.soft_limit = true;
    }

    pub fn soft_limit_flag(&self) -> bool {
        self.soft_limit
    }

    pub fn clear_soft_limit_flag(&mut self) {
        self.soft_limit = false;
    }
}

fn alarm_from_u8(code: u8) -> AlarmCode {
    match code {
        0 => AlarmCode::HardLimit,
        1 => AlarmCode::SoftLimit,
        2 => AlarmCode::HomingFailReset,
        3 => AlarmCode::HomingFailDoor,
        4 => AlarmCode::HomingFailApproach,
        5 => AlarmCode::HomingFailPulloff,
        _ => AlarmCode::HomingFailTravel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_lock_starts_clear() {
        let state = MachineState::new(MachineSettings::default());
        assert!(state.all_locks_clear());
    }

    #[test]
    fn locking_then_clearing_an_axis_unblocks_it() {
        let state = MachineState::new(MachineSettings::default());
        state.lock_axis(0, step_pin_mask(0));
        assert!(!state.all_locks_clear());
        state.clear_axis_bits(0, step_pin_mask(0));
        assert!(state.all_locks_clear());
    }

    #[test]
    fn alarm_roundtrips_through_register() {
        let mut state = MachineState::new(MachineSettings::default());
        assert_eq!(state.alarm(), None);
        state.raise_alarm(AlarmCode::HardLimit);
        assert_eq!(state.alarm(), Some(AlarmCode::HardLimit));
        assert_eq!(state.sys_state, SysState::Alarm);
        state.clear_alarm();
        assert_eq!(state.alarm(), None);
    }

    #[test]
    fn rt_flags_set_and_clear_independently() {
        let state = MachineState::new(MachineSettings::default());
        state.set_rt_flags(RtExecState::RESET | RtExecState::FEED_HOLD);
        assert!(state.rt_flags().contains(RtExecState::RESET));
        state.clear_rt_flags(RtExecState::RESET);
        assert!(!state.rt_flags().contains(RtExecState::RESET));
        assert!(state.rt_flags().contains(RtExecState::FEED_HOLD));
    }

    #[test]
    fn soft_limit_flag_is_independent_of_the_alarm_register() {
        let mut state = MachineState::new(MachineSettings::default());
        assert!(!state.soft_limit_flag());
        state.set_soft_limit_flag();
        assert!(state.soft_limit_flag());
        assert_eq!(state.alarm(), None);
        state.clear_soft_limit_flag();
        assert!(!state.soft_limit_flag());
    }
}
