//! Demo harness: runs a simulated single-axis homing cycle end to end
//! against the software-only collaborators in [`cnc_control_unit::sim`],
//! printing the resulting machine position/alarm state. Exercises the
//! same control flow a real serial/G-code front end would drive, without
//! any of the out-of-scope collaborators (planner, stepper, realtime
//! dispatcher) being real hardware.

use cnc_common::error::{AlarmCode, RtExecState};
use cnc_common::settings::{MachineFlags, MachineSettings};
use cnc_control_unit::command::dispatch;
use cnc_control_unit::homing::{HomingEngine, HomingOptions, Kinematics};
use cnc_control_unit::limits::LimitPins;
use cnc_control_unit::machine::MachineState;
use cnc_control_unit::sim::{new_pair, ScriptedPin, SimPlanner};
use tracing::info;

fn main() {
    tracing_subscriber::fmt::init();

    let mut settings = MachineSettings::default();
    settings.n_axis = 3;
    settings.steps_per_mm[0] = 80.0;
    settings.max_travel[0] = -200.0;
    settings.homing_pulloff = 1.0;
    settings.homing_dir_mask = 0b001;
    settings.flags |= MachineFlags::HOMING_ENABLE;

    // Exercise the wire dispatch path too: bump the seek rate before
    // homing, same as a front end sending `$25=...` before a `$H`.
    match dispatch("$25=600", &mut settings) {
        Ok(effects) => info!(?effects, "seek rate updated via wire command"),
        Err(err) => info!(?err, "seek rate update rejected"),
    }

    let mut machine = MachineState::new(settings);
    let engine = HomingEngine::new(Kinematics::Cartesian, HomingOptions::default());

    let mut pins = LimitPins::unbound(3);
    // Trips on the 3rd approach tick of the seek sub-cycle, releases for
    // the pull-off completion check, trips again on the 2nd locate tick,
    // releases for the final pull-off completion check.
    pins.min[0] = Some(Box::new(ScriptedPin::new(vec![
        false, false, true, false, false, true, false,
    ])));

    let mut planner = SimPlanner::default();
    let (mut stepper, mut rt) = new_pair(10);

    info!("starting homing cycle for X");
    engine.go_home(
        &mut machine,
        0b001,
        &pins,
        &mut planner,
        &mut stepper,
        &mut rt,
        |ms| info!(debounce_ms = ms, "homing debounce delay"),
    );

    match machine.alarm() {
        None => info!(position = machine.sys_position[0], "homing cycle complete"),
        Some(code) => homing_failed(code),
    }

    rt.clear_exec_state(RtExecState::all());
}

fn homing_failed(code: AlarmCode) {
    info!(?code, "homing cycle failed");
}
