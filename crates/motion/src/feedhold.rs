//! Feedhold requests and resume.
//!
//! A hold decelerates to zero along the planned path, preserving
//! position exactly, and is resumable. The state transitions themselves
//! execute inside the segment executor (see `exec`); this module is the
//! request surface:
//!
//! ```text
//!   OFF ─► SYNC ─► DECEL_CONTINUE | DECEL_TO_ZERO ─► DECEL_END
//!                                                       │
//!   OFF ◄─────────────── HOLD ◄───────── PENDING ◄──────┘
//! ```

use tracing::debug;

use crate::plan::Planner;
use crate::{HoldState, MotionState};

impl Planner {
    /// Request a feedhold. Takes effect at the next segment boundary;
    /// the running section is re-shaped in place into a deceleration.
    pub fn request_feedhold(&mut self) {
        if self.motion_state == MotionState::Run && self.hold_state == HoldState::Off {
            self.motion_state = MotionState::Hold;
            self.hold_state = HoldState::Sync;
            debug!("feedhold requested");
        }
    }

    /// Request the end of a hold. Returns true when motion restarts and
    /// the caller should request an exec; false if the queue is empty
    /// and the machine simply stops.
    pub fn request_resume(&mut self) -> bool {
        if self.hold_state != HoldState::Hold {
            return false;
        }
        self.exit_hold_state()
    }

    /// End the hold. The queue was already re-planned when the
    /// deceleration completed (the running block's length was reset to
    /// its remaining distance), so motion can restart directly.
    pub(crate) fn exit_hold_state(&mut self) -> bool {
        self.hold_state = HoldState::Off;
        if self.ring.has_runnable() {
            self.motion_state = MotionState::Run;
            debug!("feedhold released: resuming");
            true
        } else {
            self.motion_state = MotionState::Stop;
            debug!("feedhold released: queue empty");
            false
        }
    }
}
