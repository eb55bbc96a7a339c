//! The frozen machine state handed to move admission.
//!
//! The G-code interpreter and canonical machine live upstream; what
//! arrives here is an immutable snapshot of the modal state for exactly
//! one block. The planner copies it into the buffer and the runtime, and
//! never reaches back into the interpreter.

use crate::AXES;

/// Feed rate interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum FeedRateMode {
    /// F is units per minute.
    #[default]
    UnitsPerMinute,
    /// F was given in inverse-time mode; the interpreter pre-inverts it
    /// to whole-move minutes before handing it down.
    InverseTime,
}

/// Path blending behavior at block boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum PathControl {
    /// Blend through corners at the junction-limited velocity.
    #[default]
    Continuous,
    /// Come to a full stop at the end of every block.
    ExactStop,
}

/// Motion mode of the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum MotionMode {
    /// Rapid traverse (G0): rate-limited by axis velocity maxima.
    StraightTraverse,
    /// Coordinated feed (G1): paced by the requested feed rate.
    #[default]
    StraightFeed,
}

/// Distance mode, carried for reporting; targets arrive absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum DistanceMode {
    #[default]
    Absolute,
    Incremental,
}

/// Units mode, carried for reporting; targets arrive in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum Units {
    #[default]
    Millimeters,
    Inches,
}

/// One block's worth of modal machine state.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct GcodeState {
    /// Source line number, for reporting.
    pub linenum: u32,
    pub motion_mode: MotionMode,
    /// Absolute Cartesian target in mm (degrees for rotary axes).
    pub target: [f64; AXES],
    /// Feed rate in mm/min, or whole-move minutes under inverse time.
    pub feed_rate: f64,
    pub feed_rate_mode: FeedRateMode,
    pub path_control: PathControl,
    pub distance_mode: DistanceMode,
    pub units: Units,
    /// Active work offset, used when reporting work coordinates.
    pub work_offset: [f64; AXES],
    /// Optimal whole-move time in minutes. Set by move admission.
    pub move_time: f64,
    /// Rate-limit-only minimum move time in minutes. Set by move
    /// admission; the floor for feed override.
    pub minimum_time: f64,
}

impl Default for GcodeState {
    fn default() -> Self {
        Self {
            linenum: 0,
            motion_mode: MotionMode::StraightFeed,
            target: [0.0; AXES],
            feed_rate: 0.0,
            feed_rate_mode: FeedRateMode::UnitsPerMinute,
            path_control: PathControl::Continuous,
            distance_mode: DistanceMode::Absolute,
            units: Units::Millimeters,
            work_offset: [0.0; AXES],
            move_time: 0.0,
            minimum_time: 0.0,
        }
    }
}

impl GcodeState {
    /// A feed move to `target` at `feed_rate` mm/min, everything else
    /// modal defaults. Convenience for clients and tests.
    pub fn feed(target: [f64; AXES], feed_rate: f64) -> Self {
        Self {
            target,
            feed_rate,
            ..Self::default()
        }
    }

    /// A rapid traverse to `target`.
    pub fn traverse(target: [f64; AXES]) -> Self {
        Self {
            target,
            motion_mode: MotionMode::StraightTraverse,
            ..Self::default()
        }
    }
}
