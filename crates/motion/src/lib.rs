//! # Motion Planning Core
//!
//! A jerk-limited trajectory planner and segment executor for streaming
//! multi-axis motion. Cartesian line moves are admitted one G-code block
//! at a time, held in a ring of planner buffers, back- and forward-planned
//! against junction, acceleration, and jerk constraints, then decomposed
//! into fixed-duration velocity segments which are converted to per-motor
//! step counts and staged for the step generator.
//!
//! ## Pipeline
//!
//! ```text
//!  aline() ──► [planner ring] ──► exec ──► [prep slot] ──► load ──► DDA
//!  (main)       (main)          (MED)                     (HIGH)
//! ```
//!
//! The crate deliberately stops at the prep slot: pulse generation, pin
//! wiggling, and timers live in `stepgen`, behind HAL traits. There is no
//! dynamic allocation after [`Planner`] construction, and nothing here
//! blocks — long operations are decomposed into segments that each run to
//! completion within their interrupt budget.
//!
//! ## Units
//!
//! Lengths are millimeters, velocities mm/min, jerk mm/min³ (after the
//! ×10⁶ configuration multiplier), and times are minutes internally.

pub mod buffer;
pub mod error;
pub mod exec;
pub mod feedhold;
pub mod fwd_diff;
pub mod gcode;
pub mod kinematics;
pub mod lookahead;
pub mod plan;
pub mod report;
pub mod settings;
pub mod trapezoid;

pub use buffer::{BufferRing, BufferState, CommandFn, MoveBuffer, MoveType};
pub use error::{Alarm, Status};
pub use gcode::{DistanceMode, FeedRateMode, GcodeState, MotionMode, PathControl, Units};
pub use plan::{junction_vmax, BlockPlan, Planner};
pub use report::{MotionSnapshot, NullReporter, Reporter};
pub use settings::{
    load_motor_config, AxisSettings, Settings, SettingsError, SettingsSource, SystemSettings,
};

pub use stepgen::MOTORS;

/// Number of coordinated axes (X, Y, Z, A, B, C).
pub const AXES: usize = 6;

pub const AXIS_X: usize = 0;
pub const AXIS_Y: usize = 1;
pub const AXIS_Z: usize = 2;
pub const AXIS_A: usize = 3;
pub const AXIS_B: usize = 4;
pub const AXIS_C: usize = 5;

/// Number of buffers in the planner ring. Sized for the look-ahead
/// horizon plus headroom for new writes.
pub const PLANNER_BUFFER_POOL_SIZE: usize = 32;

/// Buffers held in reserve before the ring reports itself full.
pub const PLANNER_BUFFER_HEADROOM: usize = 4;

/// Restores engineering units on configured jerk values. Must stay at one
/// million.
pub const JERK_MULTIPLIER: f64 = 1_000_000.0;

pub const MIN_SEGMENT_MS: f64 = 0.75;
pub const NOM_SEGMENT_MS: f64 = 1.5;
pub const MIN_BLOCK_MS: f64 = 1.5;
/// Milliseconds without a new block before the stream is considered
/// paused.
pub const BLOCK_TIMEOUT_MS: f64 = 30.0;
pub const PHAT_CITY_MS: f64 = 100.0;
pub const PLANNER_CRITICAL_MS: f64 = 20.0;

const MS_TO_MINUTES: f64 = 1.0 / 60_000.0;

/// Nominal segment duration in minutes.
pub const NOM_SEGMENT_TIME: f64 = NOM_SEGMENT_MS * MS_TO_MINUTES;
/// Nominal segment duration in microseconds.
pub const NOM_SEGMENT_USEC: f64 = NOM_SEGMENT_MS * 1000.0;
/// Minimum segment duration in minutes.
pub const MIN_SEGMENT_TIME: f64 = MIN_SEGMENT_MS * MS_TO_MINUTES;
/// Minimum whole-block duration in minutes.
pub const MIN_BLOCK_TIME: f64 = MIN_BLOCK_MS * MS_TO_MINUTES;
/// Minimum segment duration plus scheduling margin, in minutes.
pub const MIN_SEGMENT_TIME_PLUS_MARGIN: f64 = MIN_SEGMENT_TIME * 1.05;
/// Plannable time below which the planner goes pessimistic, in minutes.
pub const PLANNER_CRITICAL_TIME: f64 = PLANNER_CRITICAL_MS * MS_TO_MINUTES;
/// Plannable time above which there is room for non-essential work, in
/// minutes.
pub const PHAT_CITY_TIME: f64 = PHAT_CITY_MS * MS_TO_MINUTES;

pub const JUNCTION_AGGRESSION_MIN: f64 = 0.001;
pub const JUNCTION_AGGRESSION_MAX: f64 = 10.0;

pub const FEED_OVERRIDE_MIN: f64 = 0.05;
pub const FEED_OVERRIDE_MAX: f64 = 2.00;

/// General floating point comparison epsilon for lengths and times.
pub const EPSILON: f64 = 1e-5;

/// Allowable velocity discontinuity between blocks, mm/min.
pub const VELOCITY_EQ_TOLERANCE: f64 = 1e-4;

/// True if the velocities match within the block-to-block tolerance.
pub fn velocity_eq(v0: f64, v1: f64) -> bool {
    (v0 - v1).abs() < VELOCITY_EQ_TOLERANCE
}

pub(crate) fn fp_zero(a: f64) -> bool {
    a.abs() < EPSILON
}

pub(crate) fn fp_not_zero(a: f64) -> bool {
    !fp_zero(a)
}

/// Minutes to microseconds.
pub(crate) fn usec(minutes: f64) -> f64 {
    minutes * 60.0e6
}

/// L2 distance between two axis vectors.
pub(crate) fn axis_vector_length(a: &[f64; AXES], b: &[f64; AXES]) -> f64 {
    let mut sum = 0.0;
    for i in 0..AXES {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum.sqrt()
}

/// Aggregate machine motion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum MotionState {
    #[default]
    Stop,
    /// Blocks are queued but movement has not been released yet.
    Planning,
    Run,
    Hold,
}

/// Feedhold progression. Transitions are executed inside the segment
/// executor so a hold always completes at zero velocity on a segment
/// boundary, preserving position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum HoldState {
    #[default]
    Off,
    /// Hold requested; the running section will be re-shaped to a tail.
    Sync,
    /// Decelerating, but the braking length spans into following blocks.
    DecelContinue,
    /// Decelerating to zero within the running block.
    DecelToZero,
    /// The zero-velocity segment has been emitted; queue replan pending.
    DecelEnd,
    /// Waiting for the step generator to drain.
    Pending,
    /// Fully held. Exec and load are no-ops until resume.
    Hold,
}

/// Planner operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum PlannerState {
    /// Ring empty, no motion.
    #[default]
    Idle,
    /// Accumulating blocks before releasing the first move.
    Startup,
    /// Leave the newest block unplanned; assume the stream continues.
    Optimistic,
    /// Plan everything; the newest block exits at zero.
    Pessimistic,
}
