//! Status codes and fatal alarms.
//!
//! Non-fatal conditions flow through the dispatcher as ordinary return
//! values and drive control flow only. Fatal conditions are typed errors:
//! they are reported through the [`Reporter`](crate::report::Reporter) at
//! the raise site and propagate out so the caller can halt motion and
//! freeze awaiting reset.

/// Non-fatal flow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation complete (for exec: the move is done).
    Ok,
    /// More work remains; call again.
    Eagain,
    /// Nothing to do. For the steppers: do not load a move.
    Noop,
    /// The requested move is below the minimum length. Benign: no buffer
    /// was committed and position did not advance.
    MinimumLengthMove,
    /// A segment with a degenerate time was dropped. Benign.
    ZeroLengthMove,
}

/// Fatal conditions. Raising one halts motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Alarm {
    /// `aline` found no EMPTY buffer. The caller violated the ring
    /// fullness gating contract.
    #[error("planner buffer ring full: {0}")]
    BufferFullFatal(&'static str),
    /// A dwell or command found no EMPTY buffer.
    #[error("failed to get planner buffer: {0}")]
    FailedGetPlannerBuffer(&'static str),
    /// A planner invariant check failed (ring integrity, state machine,
    /// or a velocity that must not be zero).
    #[error("planner assertion failure: {0}")]
    PlannerAssertion(&'static str),
    /// Unreachable dispatch state or missing callback.
    #[error("internal error: {0}")]
    InternalError(&'static str),
}

impl Alarm {
    /// The context string attached at the raise site.
    pub fn context(&self) -> &'static str {
        match self {
            Alarm::BufferFullFatal(c)
            | Alarm::FailedGetPlannerBuffer(c)
            | Alarm::PlannerAssertion(c)
            | Alarm::InternalError(c) => c,
        }
    }
}
