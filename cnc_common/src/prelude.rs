//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use cnc_common::prelude::*;` and get
//! the most important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use cnc_common::prelude::*;
//! ```

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{MAX_AXES, MIN_AXES};

// ─── Axis Masks / CoreXY ────────────────────────────────────────────
pub use crate::axis::{AXIS_1, AXIS_2, AXIS_3, A_MOTOR, B_MOTOR};

// ─── Settings ───────────────────────────────────────────────────────
pub use crate::settings::{MachineFlags, MachineSettings, SettingEffects};

// ─── Persistence ────────────────────────────────────────────────────
pub use crate::persistence::{MemoryNvm, NvmError, NvmStore, SettingsStore};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{AlarmCode, RestoreMask, RtExecState, SettingError, StatusCode};
