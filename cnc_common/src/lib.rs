//! CNC Common Library
//!
//! Shared types for the homing-cycle and limit-supervision core: the
//! persisted machine settings record, status/alarm codes, realtime-flag
//! and error bitflags, axis-mask helpers, and the checksummed
//! byte-addressable persistence primitives that back the settings store.
//!
//! # Module Structure
//!
//! - [`consts`] — axis-count bounds, homing scalars, NVM layout offsets
//! - [`axis`] — step/direction/limit pin mask lookups, CoreXY adapter
//! - [`settings`] — the persisted `MachineSettings` record and its wire dispatch
//! - [`persistence`] — checksummed byte-addressable storage primitives
//! - [`error`] — status codes, alarm codes, realtime-flag bitflags
//! - [`prelude`] — common re-exports for convenience

pub mod axis;
pub mod consts;
pub mod error;
pub mod persistence;
pub mod prelude;
pub mod settings;
