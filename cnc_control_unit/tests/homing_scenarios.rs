//! Integration coverage for the multi-collaborator scenarios of spec §8
//! that don't fit naturally as a single module's unit tests: simultaneous
//! multi-axis homing (S2), a switch that never releases during pull-off
//! (S4), and boot-time settings recovery followed by a successful homing
//! cycle (S6). S1/S3/S5 are covered as colocated unit tests in
//! `homing.rs`/`soft_limits.rs`.

use cnc_common::consts::{NVM_ADDR_GLOBAL, NVM_ADDR_VERSION, NVM_VERSION};
use cnc_common::error::AlarmCode;
use cnc_common::persistence::{MemoryNvm, NvmStore, SettingsStore};
use cnc_common::settings::MachineSettings;
use cnc_control_unit::homing::{HomingEngine, HomingOptions, Kinematics};
use cnc_control_unit::limits::LimitPins;
use cnc_control_unit::machine::MachineState;
use cnc_control_unit::sim::{new_pair, ScriptedPin, SimPlanner};

fn three_axis_settings() -> MachineSettings {
    let mut s = MachineSettings::default();
    s.n_axis = 3;
    for i in 0..3 {
        s.steps_per_mm[i] = 80.0;
        s.max_travel[i] = -200.0;
    }
    s.homing_pulloff = 1.0;
    s.homing_dir_mask = 0b111;
    s
}

/// S2: all three axes home in a single combined pass, each switch
/// tripping at a different approach tick (the 50/60/70mm analogue from
/// spec §8). Every axis must end up fully unlocked and at its expected
/// commit position; none may keep pulsing after its own bit clears.
#[test]
fn simultaneous_xyz_home_commits_all_three_axes() {
    let settings = three_axis_settings();
    let mut machine = MachineState::new(settings);
    let engine = HomingEngine::new(Kinematics::Cartesian, HomingOptions::default());

    // Sampling happens once per tick across every bound axis at once, so
    // all three scripts share one tick index: axis 0/1/2 trip on seek
    // ticks 2/3/4 respectively, release for the shared pull-off check at
    // tick 5, then trip again on locate ticks 8/9/10 and release for the
    // final pull-off check at tick 11.
    let mut pins = LimitPins::unbound(3);
    pins.min[0] = Some(Box::new(ScriptedPin::new(vec![
        false, false, true, false, false, false, false, false, true, false, false, false,
    ])));
    pins.min[1] = Some(Box::new(ScriptedPin::new(vec![
        false, false, false, true, false, false, false, false, false, true, false, false,
    ])));
    pins.min[2] = Some(Box::new(ScriptedPin::new(vec![
        false, false, false, false, true, false, false, false, false, false, true, false,
    ])));

    let mut planner = SimPlanner::default();
    let (mut stepper, mut rt) = new_pair(20);

    engine.go_home(&mut machine, 0b111, &pins, &mut planner, &mut stepper, &mut rt, |_| {});

    assert_eq!(machine.alarm(), None);
    assert!(machine.all_locks_clear());
    let expected = ((-200.0f64 + 1.0) * 80.0).round() as i32;
    for axis in 0..3 {
        assert_eq!(machine.sys_position[axis], expected, "axis {axis}");
    }
}

/// S4: the switch trips during approach but never releases during the
/// following pull-off. Expect `HomingFailPulloff`, not a silent hang.
#[test]
fn stuck_switch_after_pulloff_raises_pulloff_alarm() {
    let mut settings = MachineSettings::default();
    settings.n_axis = 3;
    settings.steps_per_mm[0] = 80.0;
    settings.max_travel[0] = -200.0;
    settings.homing_pulloff = 1.0;
    settings.homing_dir_mask = 0b001;

    let mut machine = MachineState::new(settings);
    let engine = HomingEngine::new(Kinematics::Cartesian, HomingOptions::default());

    let mut pins = LimitPins::unbound(3);
    // Trips on the 3rd approach tick and stays engaged forever after
    // (ScriptedPin repeats its last scripted value once exhausted).
    pins.min[0] = Some(Box::new(ScriptedPin::new(vec![false, false, true])));

    let mut planner = SimPlanner::default();
    let (mut stepper, mut rt) = new_pair(10);

    engine.go_home(&mut machine, 0b001, &pins, &mut planner, &mut stepper, &mut rt, |_| {});

    assert_eq!(machine.alarm(), Some(AlarmCode::HomingFailPulloff));
}

/// S6: the global settings record fails its checksum on boot. Expect
/// `init()` to recover cleanly to defaults (not panic, not return a
/// half-decoded record) and the resulting settings to still support a
/// normal homing cycle afterward.
#[test]
fn settings_corruption_on_boot_is_recovered_and_then_homeable() {
    let mut raw = MemoryNvm::new(4096);
    raw.write(NVM_ADDR_VERSION, &[NVM_VERSION]);
    // Valid version byte, but the global blob's checksum won't match its
    // (still-zeroed) trailing checksum byte once this byte is counted in.
    raw.write(NVM_ADDR_GLOBAL, &[0xFF]);

    let mut store = SettingsStore::new(raw, 3);
    let mut settings = store.init();
    assert!(settings.validate().is_ok());
    assert_eq!(settings.n_axis, 3);

    settings.steps_per_mm[0] = 80.0;
    settings.max_travel[0] = -200.0;
    settings.homing_pulloff = 1.0;
    settings.homing_dir_mask = 0b001;

    let mut machine = MachineState::new(settings);
    let engine = HomingEngine::new(Kinematics::Cartesian, HomingOptions::default());

    let mut pins = LimitPins::unbound(3);
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
