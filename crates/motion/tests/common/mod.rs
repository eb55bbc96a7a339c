//! Shared helpers for the planner integration tests.
#![allow(dead_code)] // each test binary uses its own subset

use motion::{GcodeState, NullReporter, Planner, Settings, Status, AXES, MOTORS};
use stepgen::{MotorConfig, PrepMove, PrepSlot, DDA_SUBSTEPS};

/// A target vector with only X set.
pub fn x_target(x: f64) -> [f64; AXES] {
    let mut t = [0.0; AXES];
    t[0] = x;
    t
}

/// Queue a feed move along the axes given.
pub fn feed(planner: &mut Planner, target: [f64; AXES], feed_rate: f64) {
    let gm = GcodeState::feed(target, feed_rate);
    planner
        .aline(&gm, &mut NullReporter)
        .expect("aline should not alarm");
}

/// Run the planner callback twice: once to latch the arrival, once past
/// the new-block timeout so the stream counts as paused and everything
/// plans pessimistically.
pub fn plan_to_stop(planner: &mut Planner, now_ms: f64) {
    planner
        .planner_callback(now_ms, &mut NullReporter)
        .expect("planning should not alarm");
    planner
        .planner_callback(now_ms + 31.0, &mut NullReporter)
        .expect("planning should not alarm");
}

/// Signed whole-step totals accumulated by draining the exec until it
/// goes quiet, consuming each staged segment like an instant loader.
pub fn drain_exec(planner: &mut Planner, prep: &mut PrepSlot, motors: &MotorConfig) -> [f64; MOTORS] {
    let mut totals = [0.0; MOTORS];
    let mut reporter = NullReporter;
    for _ in 0..1_000_000 {
        let status = planner
            .exec_move(prep, motors, None, true, &mut reporter)
            .expect("exec should not alarm");
        if prep.armed() {
            consume_staged(planner, prep, &mut totals);
            continue;
        }
        match status {
            Status::Noop => return totals,
            Status::Eagain | Status::Ok | Status::ZeroLengthMove => continue,
            other => panic!("unexpected exec status: {other:?}"),
        }
    }
    panic!("exec did not drain");
}

/// Consume whatever is staged in the prep slot, acting as an instant
/// loader: accumulate line segments, swallow dwells, run commands.
pub fn consume_staged(planner: &mut Planner, prep: &mut PrepSlot, totals: &mut [f64; MOTORS]) {
    match prep.move_type {
        PrepMove::Aline => {
            for m in 0..MOTORS {
                let steps = prep.motors[m].steps as f64 / DDA_SUBSTEPS;
                totals[m] += if prep.motors[m].dir { -steps } else { steps };
            }
            prep.hand_to_loader();
            prep.hand_to_exec();
        }
        PrepMove::Dwell | PrepMove::Null => {
            prep.hand_to_loader();
            prep.hand_to_exec();
        }
        PrepMove::Command => {
            let idx = prep.command_buffer as usize;
            prep.hand_to_loader();
            prep.hand_to_exec();
            planner
                .runtime_command(idx, &mut NullReporter)
                .expect("command should not alarm");
        }
    }
}

/// Drain until at least `threshold` millimeters (of motor 0 travel)
/// have been staged, then stop. Panics if the exec goes quiet first.
pub fn drain_until_mm(
    planner: &mut Planner,
    prep: &mut PrepSlot,
    motors: &MotorConfig,
    threshold: f64,
) -> [f64; MOTORS] {
    let mut totals = [0.0; MOTORS];
    let steps_per_mm = motors.steps_per_unit(0);
    for _ in 0..1_000_000 {
        if totals[0] / steps_per_mm >= threshold {
            return totals;
        }
        let status = planner
            .exec_move(prep, motors, None, true, &mut NullReporter)
            .expect("exec should not alarm");
        if prep.armed() {
            consume_staged(planner, prep, &mut totals);
            continue;
        }
        if status == Status::Noop {
            panic!("exec drained before reaching {threshold} mm");
        }
    }
    panic!("exec did not reach the threshold");
}

/// Default planner + stepper fixtures.
pub fn fixtures() -> (Planner, PrepSlot, MotorConfig) {
    (
        Planner::new(Settings::default()),
        PrepSlot::new(),
        MotorConfig::new(),
    )
}
