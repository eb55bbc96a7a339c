//! End-to-end pipeline scenarios: G-code-level moves in, step pulses
//! out, with the full planner → exec → prep → load → DDA chain running
//! under the deterministic pump.

use motion::{
    trapezoid::{target_velocity, JerkTerms},
    BufferState, HoldState, MotionState, Settings,
};
use sim::Machine;
use stepgen::{MotorConfig, PowerMode};

const MAX_TICKS: u64 = 5_000_000;

fn x(target: f64) -> [f64; 6] {
    [target, 0.0, 0.0, 0.0, 0.0, 0.0]
}

fn machine() -> Machine {
    Machine::new(Settings::default(), MotorConfig::new())
}

fn assert_steps(machine: &Machine, motor: usize, expected_mm: f64) {
    let expected = expected_mm * machine.motors.steps_per_unit(motor);
    let actual = machine.board.step_position[motor] as f64;
    assert!(
        (actual - expected).abs() <= 2.0,
        "motor {motor}: expected ~{expected} steps, emitted {actual}"
    );
}

#[test]
fn single_short_move_lands_on_target() {
    let mut machine = machine();
    machine.feed_move(x(10.0), 1000.0).expect("move queues");
    assert!(machine.run_until_idle(MAX_TICKS), "pipeline should settle");
    assert_steps(&machine, 0, 10.0);
    assert_eq!(machine.alarm(), None);
    assert_eq!(machine.snapshot().motion_state, MotionState::Stop);
    machine.planner.test_assertions().expect("ring integrity");
}

#[test]
fn colinear_blocks_cruise_at_the_requested_feed() {
    let mut machine = machine();
    machine.board.record_pulses = true;
    machine.feed_move(x(30.0), 1000.0).expect("move queues");
    machine.feed_move(x(60.0), 1000.0).expect("move queues");
    machine.feed_move(x(90.0), 1000.0).expect("move queues");
    assert!(machine.run_until_idle(MAX_TICKS));
    assert_steps(&machine, 0, 90.0);

    // At 1000 mm/min and 40 steps/mm the cruise pulse cadence is 1.5 ms.
    // The sequence must reach it (the middle block cruises) and never
    // beat it (the feed is the cap).
    let times: Vec<f64> = machine.board.pulses.iter().map(|p| p.t).collect();
    let min_interval = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    assert!(
        (1.3e-3..=1.7e-3).contains(&min_interval),
        "cruise cadence off: min interval {min_interval}"
    );
}

#[test]
fn right_angle_corner_preserves_both_axes() {
    let mut machine = machine();
    machine.feed_move(x(20.0), 1000.0).expect("move queues");
    machine
        .feed_move([20.0, 20.0, 0.0, 0.0, 0.0, 0.0], 1000.0)
        .expect("move queues");
    assert!(machine.run_until_idle(MAX_TICKS));
    assert_steps(&machine, 0, 20.0);
    assert_steps(&machine, 1, 20.0);
    // The corner slows the machine down: total time exceeds the
    // straight-line minimum of 2.4 s.
    assert!(machine.now_seconds() > 2.4);
}

#[test]
fn acceleration_limited_move_degrades_cruise() {
    let mut settings = Settings::default();
    settings.axes[0].jerk_max = 100.0; // 100e6 after the multiplier
    let mut machine = Machine::new(settings, MotorConfig::new());
    machine.feed_move(x(1.0), 1000.0).expect("move queues");

    // Tick until the block timeout releases planning, then inspect the
    // planned ramp before the move completes.
    let mut planned = None;
    for _ in 0..10_000 {
        machine.tick();
        let blocks = machine.planner.queued_blocks();
        if let Some(b) = blocks.first() {
            if b.state >= BufferState::Planned {
                planned = Some(*b);
                break;
            }
        }
    }
    let b = planned.expect("block should be planned");
    assert!((b.head_length - 0.5).abs() < 1e-6, "head {}", b.head_length);
    assert!((b.tail_length - 0.5).abs() < 1e-6, "tail {}", b.tail_length);
    assert!(b.body_length.abs() < 1e-6, "rate-limited move is HT only");
    let expected_cruise = target_velocity(0.0, 0.5, &JerkTerms::new(100.0 * 1e6));
    assert!(
        (b.cruise_velocity - expected_cruise).abs() < 1.0,
        "cruise {} vs {}",
        b.cruise_velocity,
        expected_cruise
    );
    assert!(b.cruise_velocity < 1000.0);

    assert!(machine.run_until_idle(MAX_TICKS));
    assert_steps(&machine, 0, 1.0);
}

#[test]
fn feedhold_mid_move_stops_then_resume_finishes() {
    let mut machine = machine();
    machine.feed_move(x(30.0), 1000.0).expect("move queues");
    machine.feed_move(x(60.0), 1000.0).expect("move queues");
    machine.feed_move(x(90.0), 1000.0).expect("move queues");

    assert!(machine.run_until_mm(0, 45.0, MAX_TICKS), "should reach 45mm");
    machine.request_feedhold();
    assert!(machine.run_until_hold(MAX_TICKS), "hold should settle");

    let held_at = machine.position_mm(0);
    assert!(
        held_at > 45.0 && held_at < 90.0,
        "hold must stop short of the job end, stopped at {held_at}"
    );
    assert_eq!(machine.snapshot().velocity, 0.0);
    assert_eq!(machine.snapshot().motion_state, MotionState::Hold);

    // Nothing moves while held.
    let frozen = machine.board.step_position[0];
    for _ in 0..5_000 {
        machine.tick();
    }
    assert_eq!(machine.board.step_position[0], frozen);

    machine.request_resume();
    assert!(machine.run_until_idle(MAX_TICKS), "resume should finish");
    assert_steps(&machine, 0, 90.0);
    assert_eq!(machine.planner.hold_state(), HoldState::Off);
}

#[test]
fn dwell_is_a_timed_silence_between_moves() {
    let mut machine = machine();
    machine.board.record_pulses = true;
    machine.feed_move(x(10.0), 1000.0).expect("move queues");
    machine.dwell(2.0).expect("dwell queues");
    machine.feed_move(x(20.0), 1000.0).expect("move queues");
    assert!(machine.run_until_idle(MAX_TICKS));
    assert_steps(&machine, 0, 20.0);

    let (start, end) = machine.last_dwell.expect("dwell should have timed out");
    assert!(
        ((end - start) - 2.0).abs() < 1e-4,
        "dwell lasted {} s",
        end - start
    );

    // The pulse train must show at least the dwell's worth of silence.
    let times: Vec<f64> = machine.board.pulses.iter().map(|p| p.t).collect();
    let max_gap = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(0.0, f64::max);
    assert!(max_gap >= 2.0, "largest pulse gap {max_gap} < dwell");
}

#[test]
fn polyline_round_trip_conserves_position() {
    let mut machine = machine();
    machine
        .feed_move([10.0, 5.0, 0.0, 0.0, 0.0, 0.0], 1200.0)
        .expect("move queues");
    machine
        .feed_move([20.0, -3.0, 0.0, 0.0, 0.0, 0.0], 800.0)
        .expect("move queues");
    machine
        .feed_move([4.0, 12.0, 2.0, 0.0, 0.0, 0.0], 1000.0)
        .expect("move queues");
    machine
        .feed_move([0.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1500.0)
        .expect("move queues");
    assert!(machine.run_until_idle(MAX_TICKS));
    for motor in 0..3 {
        assert_steps(&machine, motor, 0.0);
    }
    machine.planner.test_assertions().expect("ring integrity");
}

#[test]
fn powered_when_moving_motor_sleeps_after_the_job() {
    let mut motors = MotorConfig::new();
    motors.motors[0].power_mode = PowerMode::PoweredWhenMoving;
    let mut machine = Machine::new(Settings::default(), motors);
    machine.feed_move(x(5.0), 1000.0).expect("move queues");
    assert!(machine.run_until_idle(MAX_TICKS));
    assert_steps(&machine, 0, 5.0);
    assert!(
        !machine.board.enabled[0],
        "motor must be de-energized once the DDA exhausts"
    );
}

#[test]
fn queue_flush_during_hold_abandons_the_rest() {
    let mut machine = machine();
    machine.feed_move(x(30.0), 1000.0).expect("move queues");
    machine.feed_move(x(60.0), 1000.0).expect("move queues");
    assert!(machine.run_until_mm(0, 15.0, MAX_TICKS));
    machine.request_feedhold();
    assert!(machine.run_until_hold(MAX_TICKS));

    let held_at = machine.position_mm(0);
    machine.request_queue_flush();
    assert!(machine.run_until_idle(MAX_TICKS));
    assert!(!machine.planner.has_runnable_buffer());
    assert!((machine.position_mm(0) - held_at).abs() < 1e-9, "no motion on flush");

    // The planner position collapsed to the held position: a new
    // absolute move lands exactly where it should.
    let target = held_at + 5.0;
    machine.feed_move(x(target), 1000.0).expect("move queues");
    assert!(machine.run_until_idle(MAX_TICKS));
    assert_steps(&machine, 0, target);
}

#[test]
fn rapid_traverse_uses_the_axis_velocity_limit() {
    let mut machine = machine();
    machine.board.record_pulses = true;
    machine.rapid_move(x(30.0)).expect("rapid queues");
    assert!(machine.run_until_idle(MAX_TICKS));
    assert_steps(&machine, 0, 30.0);

    // velocity_max is 1500 mm/min = 1 kHz of pulses at 40 steps/mm.
    let times: Vec<f64> = machine.board.pulses.iter().map(|p| p.t).collect();
    let min_interval = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    assert!(
        (0.8e-3..=1.2e-3).contains(&min_interval),
        "traverse cadence off: min interval {min_interval}"
    );
}
