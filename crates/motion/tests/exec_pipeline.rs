//! End-to-end exec tests: planned blocks through the segment executor
//! into the prep slot, with an instant loader standing in for the step
//! generator. Position conservation is the headline property — whatever
//! the velocity machinery does, the staged steps must add up to the
//! commanded targets.

mod common;

use common::{
    consume_staged, drain_exec, drain_until_mm, feed, fixtures, plan_to_stop, x_target,
};
use motion::{HoldState, MotionState, NullReporter, Status};
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn single_move_emits_exact_steps() {
    let (mut planner, mut prep, motors) = fixtures();
    feed(&mut planner, x_target(10.0), 1000.0);
    plan_to_stop(&mut planner, 0.0);

    let totals = drain_exec(&mut planner, &mut prep, &motors);
    let expected = 10.0 * motors.steps_per_unit(0);
    assert!(
        (totals[0] - expected).abs() < 1.0,
        "expected ~{expected} steps, staged {}",
        totals[0]
    );
    for m in 1..6 {
        assert!(totals[m].abs() < 1e-6, "motor {m} must not move");
    }
    assert_eq!(planner.motion_state(), MotionState::Stop);
    assert!(!planner.has_runnable_buffer());
    planner.test_assertions().expect("ring integrity");
}

#[test]
fn out_and_back_nets_to_zero() {
    let (mut planner, mut prep, motors) = fixtures();
    feed(&mut planner, x_target(5.0), 1000.0);
    feed(&mut planner, x_target(0.0), 1000.0);
    plan_to_stop(&mut planner, 0.0);

    let totals = drain_exec(&mut planner, &mut prep, &motors);
    assert!(
        totals[0].abs() < 1.0,
        "out-and-back must net to zero, got {}",
        totals[0]
    );
}

#[test]
fn diagonal_move_coordinates_the_axes() {
    let (mut planner, mut prep, motors) = fixtures();
    feed(&mut planner, [3.0, 4.0, 0.0, 0.0, 0.0, 0.0], 1000.0);
    plan_to_stop(&mut planner, 0.0);

    let totals = drain_exec(&mut planner, &mut prep, &motors);
    assert!((totals[0] - 3.0 * motors.steps_per_unit(0)).abs() < 1.0);
    assert!((totals[1] - 4.0 * motors.steps_per_unit(1)).abs() < 1.0);
}

#[test]
fn colinear_sequence_conserves_position() {
    let (mut planner, mut prep, motors) = fixtures();
    feed(&mut planner, x_target(30.0), 1000.0);
    feed(&mut planner, x_target(60.0), 1000.0);
    feed(&mut planner, x_target(90.0), 1000.0);
    plan_to_stop(&mut planner, 0.0);

    let totals = drain_exec(&mut planner, &mut prep, &motors);
    let expected = 90.0 * motors.steps_per_unit(0);
    assert!(
        (totals[0] - expected).abs() < 1.0,
        "expected ~{expected}, staged {}",
        totals[0]
    );
}

#[test]
fn dwell_threads_through_without_disturbing_position() {
    let (mut planner, mut prep, motors) = fixtures();
    feed(&mut planner, x_target(10.0), 1000.0);
    planner.dwell(0.25, &mut NullReporter).expect("dwell queues");
    feed(&mut planner, x_target(20.0), 1000.0);
    plan_to_stop(&mut planner, 0.0);

    let totals = drain_exec(&mut planner, &mut prep, &motors);
    let expected = 20.0 * motors.steps_per_unit(0);
    assert!(
        (totals[0] - expected).abs() < 1.0,
        "expected ~{expected}, staged {}",
        totals[0]
    );
}

static COMMANDS_RUN: AtomicUsize = AtomicUsize::new(0);

fn bump_command(_values: &[f64; motion::AXES], _flags: &[bool; motion::AXES]) {
    COMMANDS_RUN.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn queued_command_executes_with_the_stream() {
    let (mut planner, mut prep, motors) = fixtures();
    feed(&mut planner, x_target(5.0), 1000.0);
    planner
        .queue_command(
            bump_command,
            &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            &[true, false, false, false, false, false],
            &mut NullReporter,
        )
        .expect("command queues");
    feed(&mut planner, x_target(10.0), 1000.0);
    plan_to_stop(&mut planner, 0.0);

    let before = COMMANDS_RUN.load(Ordering::SeqCst);
    let totals = drain_exec(&mut planner, &mut prep, &motors);
    assert_eq!(COMMANDS_RUN.load(Ordering::SeqCst), before + 1);
    let expected = 10.0 * motors.steps_per_unit(0);
    assert!((totals[0] - expected).abs() < 1.0);
    assert!(!planner.has_runnable_buffer());
}

#[test]
fn feedhold_stops_and_resume_finishes_the_job() {
    let (mut planner, mut prep, motors) = fixtures();
    feed(&mut planner, x_target(30.0), 1000.0);
    feed(&mut planner, x_target(60.0), 1000.0);
    feed(&mut planner, x_target(90.0), 1000.0);
    plan_to_stop(&mut planner, 0.0);

    // Run partway into the second block, then pull the hold.
    let mut totals = drain_until_mm(&mut planner, &mut prep, &motors, 35.0);
    planner.request_feedhold();
    assert_eq!(planner.hold_state(), HoldState::Sync);

    let decel = drain_exec(&mut planner, &mut prep, &motors);
    for m in 0..6 {
        totals[m] += decel[m];
    }
    assert_eq!(planner.hold_state(), HoldState::Hold);
    assert_eq!(planner.motion_state(), MotionState::Hold);
    let held_at = totals[0] / motors.steps_per_unit(0);
    assert!(
        held_at > 35.0 && held_at < 90.0,
        "hold must stop short of the job end, stopped at {held_at} mm"
    );
    assert_eq!(planner.runtime_velocity(), 0.0);

    // Resume: the queue was re-planned from the remaining distance.
    planner
        .planner_callback(100.0, &mut NullReporter)
        .expect("replan");
    assert!(planner.request_resume());
    planner
        .planner_callback(101.0, &mut NullReporter)
        .expect("replan");
    planner
        .planner_callback(132.0, &mut NullReporter)
        .expect("replan past timeout");
    let rest = drain_exec(&mut planner, &mut prep, &motors);
    for m in 0..6 {
        totals[m] += rest[m];
    }
    let expected = 90.0 * motors.steps_per_unit(0);
    assert!(
        (totals[0] - expected).abs() < 1.0,
        "position must be conserved through hold/resume: {} vs {expected}",
        totals[0]
    );
    assert_eq!(planner.hold_state(), HoldState::Off);
    assert_eq!(planner.motion_state(), MotionState::Stop);
}

#[test]
fn feedhold_carries_deceleration_across_blocks_when_needed() {
    let (mut planner, mut prep, motors) = fixtures();
    // Soften the jerk so the braking distance outgrows a block remainder.
    planner.apply_setting("xjm", 5.0).expect("setting applies");
    feed(&mut planner, x_target(30.0), 1000.0);
    feed(&mut planner, x_target(60.0), 1000.0);
    feed(&mut planner, x_target(90.0), 1000.0);
    plan_to_stop(&mut planner, 0.0);

    // Late in block two: remaining distance < braking distance.
    let mut totals = drain_until_mm(&mut planner, &mut prep, &motors, 52.0);
    planner.request_feedhold();

    let mut saw_continue = false;
    let mut guard = 0;
    loop {
        guard += 1;
        assert!(guard < 1_000_000, "hold did not settle");
        let status = planner
            .exec_move(&mut prep, &motors, None, true, &mut NullReporter)
            .expect("exec should not alarm");
        if planner.hold_state() == HoldState::DecelContinue {
            saw_continue = true;
        }
        if prep.armed() {
            consume_staged(&mut planner, &mut prep, &mut totals);
            continue;
        }
        if status == Status::Noop {
            break;
        }
    }
    assert!(
        saw_continue,
        "a late hold at soft jerk must span into the next block"
    );
    assert_eq!(planner.hold_state(), HoldState::Hold);
    let held_at = totals[0] / motors.steps_per_unit(0);
    assert!(held_at > 52.0 && held_at < 90.0, "held at {held_at} mm");

    planner
        .planner_callback(200.0, &mut NullReporter)
        .expect("replan");
    assert!(planner.request_resume());
    planner
        .planner_callback(201.0, &mut NullReporter)
        .expect("replan");
    planner
        .planner_callback(232.0, &mut NullReporter)
        .expect("replan past timeout");
    let rest = drain_exec(&mut planner, &mut prep, &motors);
    for m in 0..6 {
        totals[m] += rest[m];
    }
    let expected = 90.0 * motors.steps_per_unit(0);
    assert!(
        (totals[0] - expected).abs() < 1.0,
        "position must be conserved: {} vs {expected}",
        totals[0]
    );
}
