//! The reporting boundary.
//!
//! The core publishes position, velocity, and planner occupancy through
//! this trait and routes exception reports through it before raising an
//! alarm. Implementations must not block — a reporter that wants to
//! throttle or batch does so on its own side.

use crate::error::Alarm;
use crate::{MotionState, PlannerState, AXES};

/// Non-blocking report sink.
pub trait Reporter {
    /// An exception report: a fatal code plus a short context string.
    /// Called at the raise site, before the alarm propagates.
    fn exception(&mut self, alarm: Alarm);

    /// Request a status report be emitted when convenient.
    fn request_status_report(&mut self) {}

    /// Queue occupancy changed; `buffers_available` is the EMPTY count.
    fn queue_report(&mut self, _buffers_available: usize) {}
}

/// A reporter that swallows everything. Useful in tests and benches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn exception(&mut self, _alarm: Alarm) {}
}

/// A point-in-time view of the runtime for status reporting. Reads of
/// the live runtime from the foreground are advisory only; this snapshot
/// is taken between segments.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionSnapshot {
    /// Current runtime position in machine coordinates, mm.
    pub position: [f64; AXES],
    /// Current segment velocity, mm/min.
    pub velocity: f64,
    /// EMPTY buffers remaining in the planner ring.
    pub buffers_available: usize,
    pub motion_state: MotionState,
    pub planner_state: PlannerState,
}
