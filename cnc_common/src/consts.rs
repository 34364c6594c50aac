//! System-wide constants for the homing/limit core.
//!
//! Single source of truth for axis-count bounds, homing-cycle scalars, and
//! the NVM layout offsets used by [`crate::persistence`]. Imported by both
//! workspace crates — no duplication permitted.

/// Minimum supported axis count.
pub const MIN_AXES: u8 = 3;

/// Maximum supported axis count. Per-axis arrays are fixed-capacity
/// `heapless` collections sized to this bound; `n_axis` (set once at
/// startup) governs how much of each array is actually in use.
pub const MAX_AXES: usize = 6;

/// Homing axis search distance multiplier (grbl `HOMING_AXIS_SEARCH_SCALAR`).
/// Must be > 1 to ensure the limit switch engages during the seek sub-cycle.
pub const HOMING_AXIS_SEARCH_SCALAR: f64 = 1.5;

/// Homing axis locate distance multiplier (grbl `HOMING_AXIS_LOCATE_SCALAR`).
/// Must be > 1 to ensure the limit switch clears during a locate sub-cycle.
pub const HOMING_AXIS_LOCATE_SCALAR: f64 = 5.0;

/// Number of locate (slow re-approach) sub-cycles after the initial seek.
pub const N_HOMING_LOCATE_CYCLE: u8 = 1;

/// Reserved line number used when a homing move is pushed directly to the
/// planner, bypassing the normal (numbered) line entry.
pub const HOMING_CYCLE_LINE_NUMBER: i32 = -1;

/// Compile-time ceiling on commanded step rate, enforced by
/// `store_global_setting` when accepting `steps_per_mm`/`max_rate` writes.
pub const MAX_STEP_RATE_HZ: f64 = 30_000.0;

/// First settings id that decodes as an axis-scoped `(kind, axis)` pair.
pub const AXIS_SETTINGS_START: u16 = 100;

/// Stride between axis-setting kinds in the modular id decode.
pub const AXIS_SETTINGS_INCREMENT: u16 = 10;

/// Number of distinct axis-setting kinds (steps/mm, max-rate, accel,
/// max-travel, endstop-adj).
pub const AXIS_N_SETTINGS: u16 = 5;

/// Minimum accepted step pulse width [µs].
pub const MIN_PULSE_MICROSECONDS: u16 = 3;

/// Number of coordinate systems persisted (G54–G59).
pub const N_COORD: usize = 6;

/// Number of persisted startup command lines.
pub const N_STARTUP_LINE: usize = 2;

/// Fixed buffer size for persisted text lines (startup lines, build info).
pub const LINE_BUFFER_SIZE: usize = 80;

/// NVM persistence layout version. Bump when the on-disk record shapes
/// change in a way that invalidates existing images.
pub const NVM_VERSION: u8 = 1;

// ─── NVM byte offsets ────────────────────────────────────────────────
// A byte-addressable backing store laid out as:
//   [0]                          version byte
//   [1 .. 1+GLOBAL_LEN+1)        checksummed global settings blob
//   [..]                         N_COORD checksummed coord vectors
//   [..]                         N_STARTUP_LINE checksummed startup lines
//   [..]                         checksummed build-info line

/// Offset of the version byte.
pub const NVM_ADDR_VERSION: usize = 0;

/// Offset of the checksummed global settings blob.
pub const NVM_ADDR_GLOBAL: usize = 1;

static_assertions::const_assert!(MIN_AXES as usize <= MAX_AXES);
static_assertions::const_assert!(MAX_AXES <= 6);
static_assertions::const_assert!(AXIS_N_SETTINGS as usize == 5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MIN_AXES >= 3);
        assert!(MAX_AXES <= 6);
        assert!(MIN_AXES as usize <= MAX_AXES);
        assert!(HOMING_AXIS_SEARCH_SCALAR > 1.0);
        assert!(HOMING_AXIS_LOCATE_SCALAR > 1.0);
        assert!(MIN_PULSE_MICROSECONDS >= 3);
        assert_eq!(AXIS_N_SETTINGS, 5);
    }
}
