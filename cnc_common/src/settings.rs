//! The persisted machine settings record (spec §3, §4.5) and its wire
//! dispatch (`$<id>=<value>`, spec §6).
//!
//! `MachineSettings` is the in-RAM settings record: travel bounds,
//! feed/seek rates, invert masks, homing parameters, per-axis arrays.
//! Per-axis arrays are fixed-capacity `heapless::Vec`s sized to
//! [`cnc_common::consts::MAX_AXES`], following the design note to
//! reimplement the source's compile-time `N_AXIS` as a runtime bound
//! (`n_axis`) over fixed-capacity storage rather than a combinatorial
//! `cfg`-gated expansion. Every field carries a `#[serde(default =
//! "...")]` so a partial or legacy record still deserializes.

use bitflags::bitflags;
use heapless::Vec as HVec;
use serde::{Deserialize, Serialize};

use crate::consts::{AXIS_N_SETTINGS, AXIS_SETTINGS_INCREMENT, AXIS_SETTINGS_START, MAX_AXES, MAX_STEP_RATE_HZ, MIN_PULSE_MICROSECONDS};
use crate::error::StatusCode;

bitflags! {
    /// Boolean machine flags (spec §3 "Bit-flags").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MachineFlags: u16 {
        const REPORT_INCHES      = 0x0001;
        const LASER_MODE         = 0x0002;
        const INVERT_ST_ENABLE   = 0x0004;
        const HARD_LIMITS_ENABLE = 0x0008;
        const HOMING_ENABLE      = 0x0010;
        const SOFT_LIMITS_ENABLE = 0x0020;
        const INVERT_LIMIT_PINS  = 0x0040;
        const INVERT_PROBE_PIN   = 0x0080;
    }
}

impl Default for MachineFlags {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Subsystems a [`MachineSettings::store_global_setting`] write asked
    /// the caller to re-initialize (spec §4.5 "Side-effects"). This crate
    /// has no access to those out-of-scope collaborators (spindle, PWM,
    /// limit pins, probe inverter, stepper invert masks) — it only
    /// reports which ones a write touched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SettingEffects: u8 {
        /// Step/direction invert masks changed; stepper must regenerate them.
        const STEP_DIR_INVERT = 0x01;
        /// Limit-pin polarity or hard-limit-enable changed; re-init pins.
        const LIMIT_PINS      = 0x02;
        /// Spindle/laser calibration changed; re-init spindle.
        const SPINDLE         = 0x04;
        /// Auxiliary PWM min/max changed; re-init PWM.
        const AUX_PWM         = 0x08;
        /// Probe-pin invert changed; re-init probe inverter.
        const PROBE_INVERT    = 0x10;
    }
}

/// The five axis-scoped setting kinds (spec §4.5), indexed 0..4 in the
/// modular `(kind, axis)` decode. Grbl's own dispatch table skips index 4
/// (a retired backlash-compensation slot); this record has no such
/// retired slot, so the five kinds are contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AxisSettingKind {
    StepsPerMm = 0,
    MaxRate = 1,
    Acceleration = 2,
    MaxTravel = 3,
    EndstopAdj = 4,
}

impl AxisSettingKind {
    const fn from_index(idx: u16) -> Option<Self> {
        match idx {
            0 => Some(Self::StepsPerMm),
            1 => Some(Self::MaxRate),
            2 => Some(Self::Acceleration),
            3 => Some(Self::MaxTravel),
            4 => Some(Self::EndstopAdj),
            _ => None,
        }
    }
}

/// The persisted machine settings record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSettings {
    /// Number of actuated axes, 3..=6 (runtime form of compile-time `N_AXIS`).
    #[serde(default = "default_n_axis")]
    pub n_axis: u8,

    /// Step pulse width [µs], must be >= 3.
    #[serde(default = "default_pulse_microseconds")]
    pub pulse_microseconds: u16,
    /// Stepper idle lock time [ms], 0..=254; 255 = always on.
    #[serde(default = "default_idle_lock_time")]
    pub stepper_idle_lock_time: u8,
    /// Step-pin invert bitmask over axes.
    #[serde(default)]
    pub step_invert_mask: u8,
    /// Direction-pin invert bitmask over axes.
    #[serde(default)]
    pub dir_invert_mask: u8,
    /// Status report bitmask (report content options, opaque to this core).
    #[serde(default)]
    pub status_report_mask: u8,

    /// Junction deviation [mm].
    #[serde(default = "default_junction_deviation")]
    pub junction_deviation: f64,
    /// Arc tolerance [mm].
    #[serde(default = "default_arc_tolerance")]
    pub arc_tolerance: f64,

    /// Spindle RPM minimum.
    #[serde(default)]
    pub rpm_min: f64,
    /// Spindle RPM maximum.
    #[serde(default = "default_rpm_max")]
    pub rpm_max: f64,
    /// Laser PWM calibration range, if the machine has a separate laser pin.
    #[serde(default)]
    pub laser_range: Option<(f64, f64)>,
    /// Auxiliary PWM calibration range, if the machine exposes one.
    #[serde(default)]
    pub aux_pwm_range: Option<(f64, f64)>,

    /// Homing direction mask: bit set = seek toward negative.
    #[serde(default)]
    pub homing_dir_mask: u8,
    /// Fast approach (seek) rate [mm/min].
    #[serde(default = "default_homing_seek_rate")]
    pub homing_seek_rate: f64,
    /// Slow locate (feed) rate [mm/min].
    #[serde(default = "default_homing_feed_rate")]
    pub homing_feed_rate: f64,
    /// Delay between homing sub-cycles [ms].
    #[serde(default = "default_homing_debounce_delay")]
    pub homing_debounce_delay: u16,
    /// Pull-off distance after switch engagement [mm].
    #[serde(default = "default_homing_pulloff")]
    pub homing_pulloff: f64,

    /// Per-axis steps-per-mm.
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: HVec<f64, MAX_AXES>,
    /// Per-axis max rate [mm/min].
    #[serde(default = "default_max_rate")]
    pub max_rate: HVec<f64, MAX_AXES>,
    /// Per-axis acceleration [mm/min²].
    #[serde(default = "default_acceleration")]
    pub acceleration: HVec<f64, MAX_AXES>,
    /// Per-axis max travel [mm], stored negative (invariant (i)).
    #[serde(default = "default_max_travel")]
    pub max_travel: HVec<f64, MAX_AXES>,
    /// Per-axis endstop adjustment [mm]; applied only on the final locate
    /// sub-cycle of a 6-axis machine (DESIGN.md open question 1).
    #[serde(default = "default_endstop_adj")]
    pub endstop_adj: HVec<f64, MAX_AXES>,

    /// Boolean machine flags.
    #[serde(default)]
    pub flags: MachineFlags,
}

fn default_n_axis() -> u8 {
    3
}
fn default_pulse_microseconds() -> u16 {
    10
}
fn default_idle_lock_time() -> u8 {
    25
}
fn default_junction_deviation() -> f64 {
    0.01
}
fn default_arc_tolerance() -> f64 {
    0.002
}
fn default_rpm_max() -> f64 {
    1000.0
}
fn default_homing_seek_rate() -> f64 {
    500.0
}
fn default_homing_feed_rate() -> f64 {
    25.0
}
fn default_homing_debounce_delay() -> u16 {
    250
}
fn default_homing_pulloff() -> f64 {
    1.0
}
fn filled(value: f64) -> HVec<f64, MAX_AXES> {
    let mut v = HVec::new();
    for _ in 0..MAX_AXES {
        let _ = v.push(value);
    }
    v
}
fn default_steps_per_mm() -> HVec<f64, MAX_AXES> {
    filled(80.0)
}
fn default_max_rate() -> HVec<f64, MAX_AXES> {
    filled(500.0)
}
fn default_acceleration() -> HVec<f64, MAX_AXES> {
    filled(10.0)
}
fn default_max_travel() -> HVec<f64, MAX_AXES> {
    filled(-200.0)
}
fn default_endstop_adj() -> HVec<f64, MAX_AXES> {
    filled(0.0)
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            n_axis: default_n_axis(),
            pulse_microseconds: default_pulse_microseconds(),
            stepper_idle_lock_time: default_idle_lock_time(),
            step_invert_mask: 0,
            dir_invert_mask: 0,
            status_report_mask: 0,
            junction_deviation: default_junction_deviation(),
            arc_tolerance: default_arc_tolerance(),
            rpm_min: 0.0,
            rpm_max: default_rpm_max(),
            laser_range: None,
            aux_pwm_range: None,
            homing_dir_mask: 0,
            homing_seek_rate: default_homing_seek_rate(),
            homing_feed_rate: default_homing_feed_rate(),
            homing_debounce_delay: default_homing_debounce_delay(),
            homing_pulloff: default_homing_pulloff(),
            steps_per_mm: default_steps_per_mm(),
            max_rate: default_max_rate(),
            acceleration: default_acceleration(),
            max_travel: default_max_travel(),
            endstop_adj: default_endstop_adj(),
            flags: MachineFlags::default(),
        }
    }
}

impl MachineSettings {
    /// Validates the invariants of spec §3 that span multiple fields.
    pub fn validate(&self) -> Result<(), StatusCode> {
        if self.pulse_microseconds < MIN_PULSE_MICROSECONDS {
            return Err(StatusCode::SettingStepPulseMin);
        }
        for idx in 0..self.n_axis as usize {
            if self.max_travel[idx] > 0.0 {
                return Err(StatusCode::InvalidStatement);
            }
        }
        if self.flags.contains(MachineFlags::SOFT_LIMITS_ENABLE)
            && !self.flags.contains(MachineFlags::HOMING_ENABLE)
        {
            return Err(StatusCode::SoftLimitError);
        }
        Ok(())
    }

    /// Whether homing is enabled.
    #[inline]
    pub fn homing_enabled(&self) -> bool {
        self.flags.contains(MachineFlags::HOMING_ENABLE)
    }

    /// Whether soft limits are enabled.
    #[inline]
    pub fn soft_limits_enabled(&self) -> bool {
        self.flags.contains(MachineFlags::SOFT_LIMITS_ENABLE)
    }

    /// Whether hard limits are enabled.
    #[inline]
    pub fn hard_limits_enabled(&self) -> bool {
        self.flags.contains(MachineFlags::HARD_LIMITS_ENABLE)
    }

    /// Dispatches a single `$<id>=<value>` write (spec §4.5, §6).
    ///
    /// Rejects negative values outright (grbl: `if (value < 0.0) return
    /// STATUS_NEGATIVE_VALUE`), then routes named scalars (id < 100) or
    /// axis-scoped settings (id >= `AXIS_SETTINGS_START`, decoded via
    /// modular arithmetic over `AXIS_SETTINGS_INCREMENT`). On success,
    /// returns the set of out-of-scope subsystems the caller should
    /// re-initialize (spec §4.5 "Side-effects").
    pub fn store_global_setting(&mut self, id: u16, value: f64) -> Result<SettingEffects, StatusCode> {
        if value < 0.0 {
            return Err(StatusCode::NegativeValue);
        }

        if id >= AXIS_SETTINGS_START {
            return self.store_axis_setting(id - AXIS_SETTINGS_START, value);
        }

        let int_value = value.trunc() as i64;
        let mut effects = SettingEffects::empty();
        match id {
            0 => {
                if int_value < MIN_PULSE_MICROSECONDS as i64 {
                    return Err(StatusCode::SettingStepPulseMin);
                }
                self.pulse_microseconds = int_value as u16;
            }
            1 => self.stepper_idle_lock_time = int_value.min(255) as u8,
            2 => {
                self.step_invert_mask = int_value as u8;
                effects |= SettingEffects::STEP_DIR_INVERT;
            }
            3 => {
                self.dir_invert_mask = int_value as u8;
                effects |= SettingEffects::STEP_DIR_INVERT;
            }
            4 => self.set_flag(MachineFlags::INVERT_ST_ENABLE, int_value != 0),
            5 => {
                self.set_flag(MachineFlags::INVERT_LIMIT_PINS, int_value != 0);
                effects |= SettingEffects::LIMIT_PINS;
            }
            6 => {
                self.set_flag(MachineFlags::INVERT_PROBE_PIN, int_value != 0);
                effects |= SettingEffects::PROBE_INVERT;
            }
            10 => self.status_report_mask = int_value as u8,
            11 => self.junction_deviation = value,
            12 => self.arc_tolerance = value,
            13 => self.set_flag(MachineFlags::REPORT_INCHES, int_value != 0),
            20 => {
                if int_value != 0 {
                    if !self.homing_enabled() {
                        return Err(StatusCode::SoftLimitError);
                    }
                    self.flags |= MachineFlags::SOFT_LIMITS_ENABLE;
                } else {
                    self.flags.remove(MachineFlags::SOFT_LIMITS_ENABLE);
                }
            }
            21 => {
                self.set_flag(MachineFlags::HARD_LIMITS_ENABLE, int_value != 0);
                effects |= SettingEffects::LIMIT_PINS;
            }
            22 => {
                if int_value != 0 {
                    self.flags |= MachineFlags::HOMING_ENABLE;
                } else {
                    self.flags.remove(MachineFlags::HOMING_ENABLE);
                    self.flags.remove(MachineFlags::SOFT_LIMITS_ENABLE);
                }
            }
            23 => self.homing_dir_mask = int_value as u8,
            24 => self.homing_feed_rate = value,
            25 => self.homing_seek_rate = value,
            26 => self.homing_debounce_delay = int_value as u16,
            27 => self.homing_pulloff = value,
            30 => {
                self.rpm_max = value;
                effects |= SettingEffects::SPINDLE;
            }
            31 => {
                self.rpm_min = value;
                effects |= SettingEffects::SPINDLE;
            }
            32 => {
                self.set_flag(MachineFlags::LASER_MODE, int_value != 0);
                effects |= SettingEffects::SPINDLE;
            }
            33 => {
                let min = self.laser_range.map(|(lo, _)| lo).unwrap_or(0.0);
                self.laser_range = Some((min, value));
                effects |= SettingEffects::SPINDLE;
            }
            34 => {
                let max = self.laser_range.map(|(_, hi)| hi).unwrap_or(0.0);
                self.laser_range = Some((value, max));
                effects |= SettingEffects::SPINDLE;
            }
            35 => {
                let min = self.aux_pwm_range.map(|(lo, _)| lo).unwrap_or(0.0);
                self.aux_pwm_range = Some((min, value));
                effects |= SettingEffects::AUX_PWM;
            }
            36 => {
                let max = self.aux_pwm_range.map(|(_, hi)| hi).unwrap_or(0.0);
                self.aux_pwm_range = Some((value, max));
                effects |= SettingEffects::AUX_PWM;
            }
            _ => return Err(StatusCode::InvalidStatement),
        }
        Ok(effects)
    }

    fn set_flag(&mut self, flag: MachineFlags, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags.remove(flag);
        }
    }

    /// Serializes this record as a TOML machine-config file (the boot-time
    /// config-file surface alongside the `$<id>=<value>` wire form).
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Parses a TOML machine-config file into a settings record. Missing
    /// fields fall back to their `#[serde(default = "...")]` values, so a
    /// config file may specify only the fields it wants to override.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn store_axis_setting(&mut self, offset: u16, value: f64) -> Result<SettingEffects, StatusCode> {
        let kind_idx = offset / AXIS_SETTINGS_INCREMENT;
        let axis = (offset % AXIS_SETTINGS_INCREMENT) as usize;
        if kind_idx >= AXIS_N_SETTINGS || axis >= self.n_axis as usize {
            return Err(StatusCode::InvalidStatement);
        }
        let kind = AxisSettingKind::from_index(kind_idx).ok_or(StatusCode::InvalidStatement)?;

        match kind {
            AxisSettingKind::StepsPerMm => {
                if value * self.max_rate[axis] > MAX_STEP_RATE_HZ * 60.0 {
                    return Err(StatusCode::MaxStepRateExceeded);
                }
                self.steps_per_mm[axis] = value;
            }
            AxisSettingKind::MaxRate => {
                if value * self.steps_per_mm[axis] > MAX_STEP_RATE_HZ * 60.0 {
                    return Err(StatusCode::MaxStepRateExceeded);
                }
                self.max_rate[axis] = value;
            }
            // Wire value is mm/s²; stored internally as mm/min² (x3600),
            // matching the source's internal unit convention.
            AxisSettingKind::Acceleration => self.acceleration[axis] = value * 3600.0,
            AxisSettingKind::MaxTravel => self.max_travel[axis] = -value,
            AxisSettingKind::EndstopAdj => self.endstop_adj[axis] = value,
        }
        Ok(SettingEffects::empty())
    }
}
