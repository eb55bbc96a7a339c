//! Look-ahead planning across the buffer ring.
//!
//! Two passes cover the range from the newest committed block back to
//! the first block still marked replannable:
//!
//! * **Backward pass** — walking from the newest block toward the
//!   runtime, each block's braking velocity becomes the fastest entry it
//!   could accept: what its successor can absorb plus what it can bleed
//!   off over its own length.
//! * **Forward pass** — entry velocities chain from each predecessor's
//!   exit, cruise is capped by the block's own maximum, and the exit is
//!   the tightest of the exit cap, the successor's entry cap, the
//!   successor's braking velocity, and what this block can actually
//!   reach. The ramp generator then partitions lengths and times.
//!
//! The planner runs OPTIMISTIC when there is plenty of queued time —
//! leaving the newest block unplanned on the bet that the stream
//! continues — and drops to PESSIMISTIC (newest block planned to a zero
//! exit) when the queue is shallow or blocks stop arriving.

use tracing::{debug, trace};

use crate::buffer::{BufferState, MoveType};
use crate::error::{Alarm, Status};
use crate::plan::Planner;
use crate::report::Reporter;
use crate::trapezoid::calculate_trapezoid;
use crate::{
    fp_zero, velocity_eq, HoldState, MotionState, PlannerState, BLOCK_TIMEOUT_MS,
    PLANNER_CRITICAL_TIME,
};

impl Planner {
    /// Invoke planning intelligently. Call from the foreground whenever
    /// time has passed or a block has been committed; `now_ms` is a
    /// monotonic wall-clock in milliseconds.
    ///
    /// At job start the planner accumulates blocks without planning so
    /// the first move doesn't plan to zero and the queue gets a head
    /// start. It then plans optimistically while the arrival rate and
    /// queued time allow, pessimistically otherwise.
    pub fn planner_callback(
        &mut self,
        now_ms: f64,
        reporter: &mut dyn Reporter,
    ) -> Result<Status, Alarm> {
        if !self.request_planning {
            if self.ring.is_empty()
                && self.motion_state == MotionState::Stop
                && self.hold_state == HoldState::Off
            {
                self.planner_state = PlannerState::Idle;
            }
            if self.planner_state == PlannerState::Pessimistic && !self.new_block {
                return Ok(Status::Noop); // nothing new to do
            }
            if self.planner_state == PlannerState::Idle {
                if !self.new_block {
                    self.stop_new_block_timer();
                    return Ok(Status::Noop);
                }
                self.ring.p = self.ring.r;
                self.planner_state = PlannerState::Startup;
                debug!("planner: idle -> startup");
            }
        } else {
            self.request_planning = false;
        }
        if self.new_block {
            self.reset_new_block_timer(now_ms);
            self.new_block = false;
        }

        if self.planner_state == PlannerState::Startup {
            if self.ring.is_full() || self.check_new_block_timeout(now_ms) {
                self.planner_state = PlannerState::Pessimistic;
                debug!("planner: startup -> pessimistic");
            } else {
                return Ok(Status::Ok); // keep accumulating blocks
            }
        } else {
            self.planner_time_accounting();
            if self.check_new_block_timeout(now_ms) || self.plannable_time < PLANNER_CRITICAL_TIME
            {
                if self.planner_state != PlannerState::Pessimistic {
                    debug!(
                        plannable_ms = self.plannable_time * 60_000.0,
                        "planner: -> pessimistic"
                    );
                }
                self.planner_state = PlannerState::Pessimistic;
            } else {
                self.planner_state = PlannerState::Optimistic;
            }
        }

        if self.ring.newest().is_none() {
            return Ok(Status::Ok); // unconditional exit: nothing to plan
        }
        self.plan_block_list(reporter)?;
        Ok(Status::Ok)
    }

    /// Plan the block list: backward braking pass, then forward velocity
    /// assignment and ramp generation.
    pub(crate) fn plan_block_list(&mut self, reporter: &mut dyn Reporter) -> Result<(), Alarm> {
        let Some(newest) = self.ring.newest() else {
            return Ok(());
        };

        // Backward pass: find the first block still needing planning,
        // updating braking velocities on the way down. PREPPED blocks
        // are always in range — they have never been planned at all —
        // while planned blocks participate only while replannable.
        let mut bp = newest;
        loop {
            bp = self.ring.pv_of(bp);
            if bp == newest {
                break; // came all the way around
            }
            let b = self.ring.buf(bp);
            if b.locked
                || b.state == BufferState::Empty
                || b.state == BufferState::Running
                || (!b.replannable && b.state != BufferState::Prepped)
            {
                break;
            }
            let nx = self.ring.buf(self.ring.nx_of(bp));
            let absorb = nx.entry_vmax.min(nx.braking_velocity);
            let b = self.ring.buf_mut(bp);
            b.braking_velocity = absorb + b.delta_vmax;
        }

        // Forward pass: recompute velocities and ramps from the first
        // replannable block through the newest.
        let mut idx = self.ring.nx_of(bp);
        while idx != newest {
            self.plan_block_forward(idx, newest, false, reporter)?;
            idx = self.ring.nx_of(idx);
        }
        if self.planner_state == PlannerState::Pessimistic {
            // The tail of the job: plan the newest block to a stop.
            // Back-planning lifts its exit again once more blocks arrive.
            self.plan_block_forward(newest, newest, true, reporter)?;
        }
        self.ring.p = self.ring.nx_of(newest);
        Ok(())
    }

    /// Forward-plan one block. `force_zero_exit` marks the pessimistic
    /// tail.
    fn plan_block_forward(
        &mut self,
        idx: usize,
        newest: usize,
        force_zero_exit: bool,
        reporter: &mut dyn Reporter,
    ) -> Result<(), Alarm> {
        let pv_idx = self.ring.pv_of(idx);
        let nx_idx = self.ring.nx_of(idx);

        match self.ring.buf(idx).state {
            BufferState::Empty => {
                let alarm = Alarm::PlannerAssertion("empty buffer in forward pass");
                reporter.exception(alarm);
                return Err(alarm);
            }
            BufferState::Running => {
                let alarm = Alarm::PlannerAssertion("replanned a running buffer");
                reporter.exception(alarm);
                return Err(alarm);
            }
            _ => {}
        }

        // Dwells and commands plan as momentary stops: zero in, zero
        // out, nothing to ramp.
        if self.ring.buf(idx).move_type != MoveType::Aline {
            let b = self.ring.buf_mut(idx);
            b.replannable = false;
            b.entry_velocity = 0.0;
            b.cruise_velocity = 0.0;
            b.exit_velocity = 0.0;
            b.braking_velocity = 0.0;
            if b.state == BufferState::Prepped {
                b.state = BufferState::Planned;
            }
            return Ok(());
        }

        let entry = if pv_idx == newest {
            self.ring.buf(idx).entry_vmax // first block in a full ring
        } else {
            self.ring.buf(pv_idx).exit_velocity
        };
        let (nx_entry_vmax, nx_braking) = {
            let nx = self.ring.buf(nx_idx);
            (nx.entry_vmax, nx.braking_velocity)
        };
        let pv_replannable = self.ring.buf(pv_idx).replannable;

        let b = self.ring.buf_mut(idx);
        b.entry_velocity = entry;
        b.cruise_velocity = b.cruise_vmax;
        b.exit_velocity = if force_zero_exit {
            0.0
        } else {
            b.exit_vmax
                .min(nx_entry_vmax)
                .min(nx_braking)
                .min(b.entry_velocity + b.delta_vmax)
        };
        calculate_trapezoid(b);

        if fp_zero(b.cruise_velocity) {
            let alarm = Alarm::PlannerAssertion("zero cruise velocity in forward pass");
            reporter.exception(alarm);
            return Err(alarm);
        }

        // A block whose exit sits on one of the binding caps cannot be
        // improved; once its predecessor is frozen too it drops out of
        // the replan range.
        if !force_zero_exit
            && (velocity_eq(b.exit_velocity, b.exit_vmax)
                || velocity_eq(b.exit_velocity, nx_entry_vmax)
                || (!pv_replannable
                    && velocity_eq(b.exit_velocity, b.entry_velocity + b.delta_vmax)))
        {
            b.replannable = false;
        }
        if b.state == BufferState::Prepped {
            b.state = BufferState::Planned;
        }
        trace!(
            idx,
            entry = b.entry_velocity,
            cruise = b.cruise_velocity,
            exit = b.exit_velocity,
            "block planned"
        );
        Ok(())
    }

    /// Revert queued blocks to PREPPED and ask for a fresh planning
    /// pass. Used on hold completion, queue edits, and override changes.
    /// A RUNNING buffer is never touched — an executing block completes
    /// on its existing plan; a hold that stopped the runtime downgrades
    /// its own buffer before calling this.
    pub(crate) fn replan_queue(&mut self, from: usize) {
        let mut idx = from;
        loop {
            let b = self.ring.buf_mut(idx);
            if b.state == BufferState::Empty {
                break;
            }
            if b.state != BufferState::Running {
                if b.state == BufferState::Planned {
                    b.state = BufferState::Prepped;
                }
                b.replannable = true;
                b.locked = false;
            }
            idx = self.ring.nx_of(idx);
            if idx == from {
                break;
            }
        }
        self.request_planning = true;
    }

    /// Gather the time queued ahead of the runtime.
    pub(crate) fn planner_time_accounting(&mut self) {
        let mut plannable_time = 0.0;
        let mut idx = self.ring.r;
        loop {
            let b = self.ring.buf(idx);
            match b.state {
                BufferState::Empty => break,
                BufferState::Running => plannable_time += self.run_time_remaining,
                _ => plannable_time += b.move_time,
            }
            idx = self.ring.nx_of(idx);
            if idx == self.ring.r {
                break;
            }
        }
        self.plannable_time = plannable_time;
    }

    fn stop_new_block_timer(&mut self) {
        self.new_block_deadline_ms = 0.0;
        self.new_block_timeout = false;
    }

    fn reset_new_block_timer(&mut self, now_ms: f64) {
        self.new_block_deadline_ms = now_ms + BLOCK_TIMEOUT_MS;
        self.new_block_timeout = false;
    }

    fn check_new_block_timeout(&mut self, now_ms: f64) -> bool {
        if self.ring.is_full() || self.new_block_deadline_ms == 0.0 {
            self.reset_new_block_timer(now_ms);
        } else if now_ms > self.new_block_deadline_ms {
            self.new_block_timeout = true;
        }
        self.new_block_timeout
    }
}
