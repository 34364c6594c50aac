//! Status codes, alarm causes, and bitflag registers for the homing/limit core.
//!
//! Realtime flags and restore selectors are bitflag sets, one
//! `bitflags!` block per concern; the settings wire status and the
//! homing alarm cause are plain enums, since the source system models
//! them as a single code rather than a combinable set.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Realtime flags observed by cooperative yield points (spec §3/§5).
    ///
    /// Set by interrupt contexts (step timer, limit-pin edge), cleared by
    /// the foreground. Single-byte stores; no barrier required on an
    /// in-order single-core target, but stores must not be reordered past
    /// the segment-refill call (see `cnc_control_unit::collaborators`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RtExecState: u8 {
        /// A system reset was requested; terminal for any in-progress cycle.
        const RESET        = 0x01;
        /// The safety door interlock opened.
        const SAFETY_DOOR  = 0x02;
        /// The current motion block/cycle completed or was stopped.
        const CYCLE_STOP   = 0x04;
        /// A feed hold was requested.
        const FEED_HOLD    = 0x08;
    }
}

bitflags! {
    /// Selectors for [`crate::settings::restore`] (grbl `SETTINGS_RESTORE_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RestoreMask: u8 {
        /// Reset the global settings record to compiled-in defaults.
        const DEFAULTS       = 0x01;
        /// Clear all persisted coordinate-system origin vectors.
        const PARAMETERS     = 0x02;
        /// Clear all persisted startup command lines.
        const STARTUP_LINES  = 0x04;
        /// Clear the persisted build-info line.
        const BUILD_INFO     = 0x08;
        /// Every subset above.
        const ALL = Self::DEFAULTS.bits() | Self::PARAMETERS.bits()
            | Self::STARTUP_LINES.bits() | Self::BUILD_INFO.bits();
    }
}

/// Status codes surfaced to the command layer (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatusCode {
    #[error("ok")]
    Ok,
    #[error("invalid statement")]
    InvalidStatement,
    #[error("value must not be negative")]
    NegativeValue,
    #[error("step pulse width must be >= 3us")]
    SettingStepPulseMin,
    #[error("requested step rate exceeds compile-time maximum")]
    MaxStepRateExceeded,
    #[error("soft limits require homing to be enabled")]
    SoftLimitError,
    #[error("settings record failed checksum validation")]
    SettingReadFail,
}

/// Homing-failure / limit-trip alarm causes (spec §3/§4.4/§4.7).
///
/// The system holds at most one pending alarm at a time (spec §3: "a
/// single alarm cause code"), so this is a plain enum rather than a
/// bitflag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AlarmCode {
    #[error("hard limit switch triggered during normal motion")]
    HardLimit,
    #[error("soft limit envelope violated")]
    SoftLimit,
    #[error("homing cycle aborted: system reset issued")]
    HomingFailReset,
    #[error("homing cycle aborted: safety door opened")]
    HomingFailDoor,
    #[error("homing cycle failed: limit switch never triggered during approach")]
    HomingFailApproach,
    #[error("homing cycle failed: limit switch still engaged after pull-off")]
    HomingFailPulloff,
    #[error("homing cycle failed: configured max_travel too small to clear locate scalar")]
    HomingFailTravel,
}

/// Errors returned by [`crate::settings::MachineSettings::store_global_setting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SettingError {
    #[error(transparent)]
    Status(#[from] StatusCodeError),
}

/// Newtype so `StatusCode` (which also serves as a non-error "Ok" value)
/// can participate in `thiserror`'s `#[from]` without confusing the two
/// roles it plays on the wire (spec §6 status codes vs. Rust `Result`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StatusCodeError(pub StatusCode);

impl From<StatusCode> for SettingError {
    fn from(code: StatusCode) -> Self {
        SettingError::Status(StatusCodeError(code))
    }
}

impl SettingError {
    /// The wire status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SettingError::Status(StatusCodeError(code)) => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rt_exec_state_bits_are_distinct() {
        let all = RtExecState::RESET
            | RtExecState::SAFETY_DOOR
            | RtExecState::CYCLE_STOP
            | RtExecState::FEED_HOLD;
        assert_eq!(all.bits(), 0x0F);
    }

    #[test]
    fn restore_all_covers_every_subset() {
        assert!(RestoreMask::ALL.contains(RestoreMask::DEFAULTS));
        assert!(RestoreMask::ALL.contains(RestoreMask::PARAMETERS));
        assert!(RestoreMask::ALL.contains(RestoreMask::STARTUP_LINES));
        assert!(RestoreMask::ALL.contains(RestoreMask::BUILD_INFO));
    }

    #[test]
    fn setting_error_roundtrips_status_code() {
        let err: SettingError = StatusCode::NegativeValue.into();
        assert_eq!(err.status_code(), StatusCode::NegativeValue);
    }
}
