//! `$<id>=<value>` settings wire dispatch (spec §6 "Settings wire format",
//! grounded on `grbl/settings.c`'s text command parser).
//!
//! This module owns only the text-to-`(id, value)` parse; the actual
//! decode/validate/apply logic already lives on
//! [`cnc_common::settings::MachineSettings::store_global_setting`]. A
//! serial reporting layer (out of scope, per spec §1) would sit in front
//! of this and turn [`StatusCode`] into the wire status line.

use cnc_common::error::StatusCode;
use cnc_common::settings::{MachineSettings, SettingEffects};
use thiserror::Error;
use tracing::{info, warn};

/// A single parsed `$<id>=<value>` statement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingWrite {
    pub id: u16,
    pub value: f64,
}

/// Errors from the wire-command layer: malformed `$<id>=<value>` text, or
/// a well-formed statement [`MachineSettings::store_global_setting`]
/// rejected. Kept distinct from [`StatusCode`] so a parse failure (never
/// reaching the settings record) and a semantic rejection (settings
/// validated the write and said no) don't collapse into one variant
/// before the wire layer (out of scope, per spec §1) decides how to
/// report each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("missing leading '$'")]
    MissingPrefix,
    #[error("missing '=' between id and value")]
    MissingEquals,
    #[error("setting id is not a valid integer")]
    InvalidId,
    #[error("setting value is not a valid number")]
    InvalidValue,
    #[error(transparent)]
    Rejected(#[from] StatusCode),
}

impl From<CommandError> for StatusCode {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::MissingPrefix
            | CommandError::MissingEquals
            | CommandError::InvalidId
            | CommandError::InvalidValue => StatusCode::InvalidStatement,
            CommandError::Rejected(status) => status,
        }
    }
}

/// Parses one line of the form `$<id>=<value>` (whitespace around the
/// `=` and trailing/leading whitespace tolerated; grbl itself is strict
/// about the leading `$` but lenient about surrounding whitespace in the
/// rest of the line).
pub fn parse_setting_write(line: &str) -> Result<SettingWrite, CommandError> {
    let body = line.trim().strip_prefix('$').ok_or(CommandError::MissingPrefix)?;
    let (id_part, value_part) = body.split_once('=').ok_or(CommandError::MissingEquals)?;

    let id: u16 = id_part.trim().parse().map_err(|_| CommandError::InvalidId)?;
    let value: f64 = value_part.trim().parse().map_err(|_| CommandError::InvalidValue)?;

    Ok(SettingWrite { id, value })
}

/// Parses and applies one `$<id>=<value>` line against `settings` (spec
/// §4.5/§6). Returns the subsystem re-init effects on success; on
/// rejection `settings` is left untouched.
pub fn dispatch(line: &str, settings: &mut MachineSettings) -> Result<SettingEffects, CommandError> {
    let write = parse_setting_write(line)?;
    match settings.store_global_setting(write.id, write.value) {
        Ok(effects) => {
            info!(id = write.id, value = write.value, ?effects, "setting applied");
            Ok(effects)
        }
        Err(status) => {
            warn!(id = write.id, value = write.value, ?status, "setting write rejected");
            Err(status.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_id_and_float_value() {
        let write = parse_setting_write("$100=80.0").unwrap();
        assert_eq!(write.id, 100);
        assert_eq!(write.value, 80.0);
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let write = parse_setting_write("  $ 22 = 1 \n").unwrap();
        assert_eq!(write.id, 22);
        assert_eq!(write.value, 1.0);
    }

    #[test]
    fn rejects_missing_dollar_prefix() {
        assert_eq!(parse_setting_write("100=80.0"), Err(CommandError::MissingPrefix));
    }

    #[test]
    fn rejects_missing_equals() {
        assert_eq!(parse_setting_write("$100"), Err(CommandError::MissingEquals));
    }

    #[test]
    fn rejects_non_numeric_value() {
        assert_eq!(parse_setting_write("$100=abc"), Err(CommandError::InvalidValue));
    }

    #[test]
    fn every_command_error_maps_to_its_wire_status_code() {
        assert_eq!(StatusCode::from(CommandError::MissingPrefix), StatusCode::InvalidStatement);
        assert_eq!(StatusCode::from(CommandError::MissingEquals), StatusCode::InvalidStatement);
        assert_eq!(StatusCode::from(CommandError::InvalidId), StatusCode::InvalidStatement);
        assert_eq!(StatusCode::from(CommandError::InvalidValue), StatusCode::InvalidStatement);
        assert_eq!(
            StatusCode::from(CommandError::Rejected(StatusCode::NegativeValue)),
            StatusCode::NegativeValue
        );
    }

    #[test]
    fn dispatch_applies_and_rejects_through_the_settings_record() {
        let mut settings = MachineSettings::default();
        let effects = dispatch("$100=90.0", &mut settings).unwrap();
        assert_eq!(effects, SettingEffects::empty());
        assert_eq!(settings.steps_per_mm[0], 90.0);

        let err = dispatch("$100=-1.0", &mut settings).unwrap_err();
        assert_eq!(err, CommandError::Rejected(StatusCode::NegativeValue));
    }
}
