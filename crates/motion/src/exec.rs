//! The segment executor.
//!
//! Fires from the medium interrupt level once per step-generator
//! exhaustion and advances the running block one segment at a time
//! through its head, body, and tail. The interrupt sequencing relies on
//! these routines being exactly correct: each call must prepare *at most
//! one* segment. If the block has more segments to run the call returns
//! `Eagain`; the last segment returns `Ok`, which ends the block and
//! frees its buffer. Anything else must not load the steppers.
//!
//! Everything here must also complete in less time than the shortest
//! possible segment, which is why section velocities come from five
//! cached forward-difference accumulators instead of re-evaluating the
//! quintic.

use stepgen::{Encoders, MotorConfig, PrepError, PrepSlot};
use tracing::debug;

use crate::buffer::{BufferState, MoveType, RunState};
use crate::error::{Alarm, Status};
use crate::fwd_diff::ForwardDiffs;
use crate::gcode::GcodeState;
use crate::kinematics::inverse_kinematics;
use crate::plan::Planner;
use crate::report::Reporter;
use crate::trapezoid::{target_length, target_velocity, JerkTerms};
use crate::{
    axis_vector_length, fp_zero, usec, HoldState, MotionState, AXES, MIN_SEGMENT_TIME, MOTORS,
    NOM_SEGMENT_USEC,
};

/// Which section of the block is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Section {
    #[default]
    Head = 0,
    Body = 1,
    Tail = 2,
}

/// Sub-state within a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SectionState {
    #[default]
    New,
    FirstHalf,
    SecondHalf,
}

enum SegmentOutcome {
    /// Segment staged; the section has more to run.
    More,
    /// Segment staged and it was the section's last.
    SectionDone,
    /// The prep layer refused a degenerate segment time.
    Dropped,
}

/// Persistent runtime context: the in-flight block's frozen data plus
/// the section/segment machinery. Touched only by the exec level; reads
/// from the foreground are advisory.
#[derive(Debug)]
pub struct Runtime {
    pub(crate) block_state: RunState,
    pub(crate) section: Section,
    pub(crate) section_state: SectionState,

    pub(crate) unit: [f64; AXES],
    pub(crate) axis_flags: [bool; AXES],
    /// Final target of the block, for drift correction.
    pub(crate) target: [f64; AXES],
    /// Current position, advanced per segment.
    pub(crate) position: [f64; AXES],
    /// Head/body/tail endpoint positions for waypoint correction.
    pub(crate) waypoint: [[f64; AXES]; 3],

    pub(crate) target_steps: [f64; MOTORS],
    pub(crate) position_steps: [f64; MOTORS],
    /// Delayed one more segment to time-align with encoder sampling.
    pub(crate) commanded_steps: [f64; MOTORS],
    pub(crate) encoder_steps: [f64; MOTORS],
    pub(crate) following_error: [f64; MOTORS],

    pub(crate) gm: GcodeState,

    pub(crate) entry_velocity: f64,
    pub(crate) cruise_velocity: f64,
    pub(crate) exit_velocity: f64,
    pub(crate) head_length: f64,
    pub(crate) body_length: f64,
    pub(crate) tail_length: f64,
    pub(crate) head_time: f64,
    pub(crate) body_time: f64,
    pub(crate) tail_time: f64,
    pub(crate) jt: JerkTerms,

    pub(crate) segments: f64,
    pub(crate) segment_count: u32,
    pub(crate) segment_velocity: f64,
    pub(crate) segment_time: f64,
    pub(crate) fwd: ForwardDiffs,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            block_state: RunState::Off,
            section: Section::Head,
            section_state: SectionState::New,
            unit: [0.0; AXES],
            axis_flags: [false; AXES],
            target: [0.0; AXES],
            position: [0.0; AXES],
            waypoint: [[0.0; AXES]; 3],
            target_steps: [0.0; MOTORS],
            position_steps: [0.0; MOTORS],
            commanded_steps: [0.0; MOTORS],
            encoder_steps: [0.0; MOTORS],
            following_error: [0.0; MOTORS],
            gm: GcodeState::default(),
            entry_velocity: 0.0,
            cruise_velocity: 0.0,
            exit_velocity: 0.0,
            head_length: 0.0,
            body_length: 0.0,
            tail_length: 0.0,
            head_time: 0.0,
            body_time: 0.0,
            tail_time: 0.0,
            jt: JerkTerms {
                jerk: 0.0,
                recip_jerk: 0.0,
                cbrt_jerk: 0.0,
            },
            segments: 0.0,
            segment_count: 0,
            segment_velocity: 0.0,
            segment_time: 0.0,
            fwd: ForwardDiffs::default(),
        }
    }

    /// Invalidate the in-flight block.
    pub(crate) fn reset_block(&mut self) {
        self.block_state = RunState::Off;
        self.section = Section::Head;
        self.section_state = SectionState::New;
        self.segment_velocity = 0.0;
        self.exit_velocity = 0.0;
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    /// Dequeue the run buffer and execute its continuation, staging at
    /// most one segment into the prep slot.
    ///
    /// `stepper_idle` reports whether the step generator has fully
    /// drained; it gates the hold-pending transition.
    pub fn exec_move(
        &mut self,
        prep: &mut PrepSlot,
        motors: &MotorConfig,
        encoders: Option<&mut dyn Encoders>,
        stepper_idle: bool,
        reporter: &mut dyn Reporter,
    ) -> Result<Status, Alarm> {
        // Terminal hold states gate everything, including the buffer
        // state machine: the queue is mid-replan while the hold settles.
        if self.motion_state == MotionState::Hold {
            match self.hold_state {
                // All motion has ceased. VERY important to stay a NOOP.
                HoldState::Hold => return Ok(Status::Noop),
                // Wait for the steppers to actually clear out.
                HoldState::Pending => {
                    if stepper_idle {
                        self.hold_state = HoldState::Hold;
                        self.rt.segment_velocity = 0.0;
                        reporter.request_status_report();
                        debug!("feedhold: holding");
                    }
                    return Ok(Status::Ok);
                }
                _ => {}
            }
        }

        // NULL means nothing's running - this is OK.
        let Some(idx) = self.ring.get_run_buffer() else {
            prep.prep_null();
            return Ok(Status::Noop);
        };

        let state = self.ring.buf(idx).state;
        if state != BufferState::Running {
            if state < BufferState::Prepped {
                reporter.exception(Alarm::PlannerAssertion("exec buffer is not prepped"));
                prep.prep_null();
                return Ok(Status::Noop);
            }
            if state == BufferState::Prepped {
                // Not planned yet. Ask for planning rather than doing it
                // here at interrupt level.
                self.request_planning = true;
                return Ok(Status::Noop);
            }
            // Must precede the time accounting.
            self.ring.buf_mut(idx).state = BufferState::Running;
            self.planner_time_accounting();
        }
        if self.ring.buf(self.ring.nx_of(idx)).state == BufferState::Prepped {
            self.request_planning = true;
        }

        match self.ring.buf(idx).move_type {
            MoveType::Aline => {
                // Cycle auto-start for lines only.
                if self.motion_state != MotionState::Run && self.motion_state != MotionState::Hold
                {
                    self.motion_state = MotionState::Run;
                }
                self.exec_aline(idx, prep, motors, encoders, reporter)
            }
            MoveType::Dwell => self.exec_dwell(idx, prep),
            MoveType::Command => {
                prep.prep_command(idx as u8);
                Ok(Status::Ok)
            }
            MoveType::Null => {
                let alarm = Alarm::InternalError("null move in exec dispatch");
                reporter.exception(alarm);
                Err(alarm)
            }
        }
    }

    /// True while a block is mid-execution.
    pub fn runtime_active(&self) -> bool {
        self.rt.block_state != RunState::Off
    }

    /// Current segment velocity, mm/min.
    pub fn runtime_velocity(&self) -> f64 {
        self.rt.segment_velocity
    }

    /// Correct the reported velocity to zero in the last segment.
    pub fn zero_segment_velocity(&mut self) {
        self.rt.segment_velocity = 0.0;
    }

    /// Current runtime position in machine coordinates.
    pub fn runtime_absolute_position(&self, axis: usize) -> f64 {
        self.rt.position[axis]
    }

    /// Current runtime position in the work frame active at planning
    /// time.
    pub fn runtime_work_position(&self, axis: usize) -> f64 {
        self.rt.position[axis] - self.rt.gm.work_offset[axis]
    }

    /// Overwrite the runtime position (homing, etc).
    pub fn set_runtime_position(&mut self, axis: usize, position: f64) {
        self.rt.position[axis] = position;
    }

    /// Set work offsets in the runtime frame.
    pub fn set_runtime_work_offset(&mut self, offset: [f64; AXES]) {
        self.rt.gm.work_offset = offset;
    }

    fn exec_dwell(&mut self, idx: usize, prep: &mut PrepSlot) -> Result<Status, Alarm> {
        let seconds = self.ring.buf(idx).dwell_seconds;
        prep.prep_dwell(seconds);
        if self.ring.free_run_buffer() && self.hold_state == HoldState::Off {
            self.cycle_end();
        }
        Ok(Status::Ok)
    }

    /// Acceleration-line continuation: one call, one segment.
    fn exec_aline(
        &mut self,
        idx: usize,
        prep: &mut PrepSlot,
        motors: &MotorConfig,
        encoders: Option<&mut dyn Encoders>,
        reporter: &mut dyn Reporter,
    ) -> Result<Status, Alarm> {
        if self.ring.buf(idx).run_state == RunState::Off {
            return Ok(Status::Noop);
        }

        // Initialize new blocks, regardless of normal or hold operation.
        let mut fresh_block = false;
        if self.rt.block_state == RunState::Off {
            fresh_block = true;
            self.init_block(idx, reporter);
        }

        if self.motion_state == MotionState::Hold {
            match self.hold_state {
                // Decelerated to zero: shrink the block to its unexecuted
                // remainder and force a replan of the whole queue.
                HoldState::DecelEnd => {
                    self.rt.block_state = RunState::Off;
                    let remaining = axis_vector_length(&self.rt.target, &self.rt.position);
                    if fp_zero(remaining) {
                        // The hold landed exactly on the block boundary:
                        // nothing left to resume, so release the buffer
                        // instead of replanning a zero-length stub.
                        self.ring.free_run_buffer();
                    } else {
                        let bf = self.ring.buf_mut(idx);
                        bf.run_state = RunState::New;
                        bf.length = remaining;
                        let jt = bf.jerk_terms();
                        bf.delta_vmax = target_velocity(0.0, remaining, &jt);
                        bf.braking_velocity = bf.delta_vmax;
                        // The runtime has stopped, so this block may be
                        // downgraded for replanning; replan_queue itself
                        // never touches a running buffer.
                        bf.state = BufferState::Prepped;
                        bf.replannable = true;
                    }
                    let run_idx = self.ring.r;
                    self.replan_queue(run_idx);
                    self.hold_state = HoldState::Pending;
                    return Ok(Status::Ok);
                }

                // Build a tail-only move from here: decelerate as fast as
                // possible in the space we have.
                HoldState::Sync | HoldState::DecelContinue | HoldState::DecelToZero => {
                    if self.hold_state == HoldState::Sync
                        || (self.hold_state == HoldState::DecelContinue && fresh_block)
                    {
                        self.enter_hold_deceleration();
                    }
                    // An in-progress deceleration just continues.
                }

                // Hold and Pending were handled before dispatch.
                HoldState::Off | HoldState::Hold | HoldState::Pending => {}
            }
        }
        self.rt.block_state = RunState::Run;

        // NB: from this point on the buffer contents do not affect
        // execution; everything runs from the runtime copies.
        let status = self.run_sections(prep, motors, encoders)?;

        if self.rt.section == Section::Tail {
            // Once in the tail the block can no longer be replanned.
            self.ring.buf_mut(idx).plannable = false;
        }

        // End of the hold deceleration: flag the queue replan.
        if self.hold_state == HoldState::DecelToZero && status == Status::Ok {
            self.hold_state = HoldState::DecelEnd;
            // The bf buffer restarts for the rest of the block on resume.
            self.ring.buf_mut(idx).run_state = RunState::New;
        }

        if status == Status::Eagain {
            reporter.request_status_report();
        } else {
            // The block is done (or was dropped); invalidate the runtime.
            self.rt.block_state = RunState::Off;
            self.rt.section_state = SectionState::New;
            self.run_time_remaining = 0.0;
            if self.ring.buf(idx).run_state == RunState::Run {
                if self.ring.free_run_buffer() && self.hold_state == HoldState::Off {
                    self.cycle_end();
                }
                reporter.queue_report(self.ring.buffers_available);
            }
        }
        Ok(status)
    }

    /// Copy the planned block into the runtime and derive the waypoints.
    fn init_block(&mut self, idx: usize, reporter: &mut dyn Reporter) {
        // Too-short lines were filtered at admission; alert if one ever
        // gets through.
        if fp_zero(self.ring.buf(idx).length) {
            reporter.exception(Alarm::PlannerAssertion("zero length move in exec"));
        }
        self.ring.buf_mut(idx).run_state = RunState::Run;

        let bf = self.ring.buf(idx);
        let rt = &mut self.rt;
        rt.gm = bf.gm;
        rt.block_state = RunState::New;
        rt.section = Section::Head;
        rt.section_state = SectionState::New;
        rt.jt = bf.jerk_terms();

        // The old exit feeds the new entry; the planner keeps these
        // continuous so this also seeds correctly after a hold.
        rt.entry_velocity = rt.exit_velocity;
        rt.cruise_velocity = bf.cruise_velocity;
        rt.exit_velocity = bf.exit_velocity;

        rt.head_length = bf.head_length;
        rt.body_length = bf.body_length;
        rt.tail_length = bf.tail_length;
        rt.head_time = bf.head_time;
        rt.body_time = bf.body_time;
        rt.tail_time = bf.tail_time;

        // Sections too brief to execute are folded into the body; the
        // small velocity error is preferable to a starved loader.
        if rt.head_length > 0.0 && rt.head_time < MIN_SEGMENT_TIME {
            rt.body_time += rt.head_length / rt.cruise_velocity;
            rt.body_length += rt.head_length;
            rt.head_time = 0.0;
            rt.head_length = 0.0;
        }
        if rt.tail_length > 0.0 && rt.tail_time < MIN_SEGMENT_TIME {
            rt.body_time += rt.tail_length / rt.cruise_velocity;
            rt.body_length += rt.tail_length;
            rt.tail_time = 0.0;
            rt.tail_length = 0.0;
        }
        // And a too-brief body goes the other way.
        if rt.body_length > 0.0 && rt.body_time < MIN_SEGMENT_TIME {
            if rt.tail_length > 0.0 {
                if rt.head_length > 0.0 {
                    let split = rt.body_length / 2.0;
                    rt.head_length += split;
                    rt.tail_length += split;
                    rt.head_time += 2.0 * split / (rt.entry_velocity + rt.cruise_velocity);
                    rt.tail_time += 2.0 * split / (rt.cruise_velocity + rt.exit_velocity);
                } else {
                    rt.tail_length += rt.body_length;
                    rt.tail_time +=
                        2.0 * rt.body_length / (rt.cruise_velocity + rt.exit_velocity);
                }
                rt.body_length = 0.0;
                rt.body_time = 0.0;
            } else if rt.head_length > 0.0 {
                rt.head_length += rt.body_length;
                rt.head_time += 2.0 * rt.body_length / (rt.entry_velocity + rt.cruise_velocity);
                rt.body_length = 0.0;
                rt.body_time = 0.0;
            }
            // A body-only block this brief was already degraded by the
            // ramp generator; it executes as a single segment.
        }

        rt.unit = bf.unit;
        rt.axis_flags = bf.axis_flags;
        rt.target = bf.gm.target;

        // Waypoints correct accumulated float drift at section ends.
        for axis in 0..AXES {
            rt.waypoint[Section::Head as usize][axis] =
                rt.position[axis] + rt.unit[axis] * rt.head_length;
            rt.waypoint[Section::Body as usize][axis] =
                rt.position[axis] + rt.unit[axis] * (rt.head_length + rt.body_length);
            rt.waypoint[Section::Tail as usize][axis] = rt.position[axis]
                + rt.unit[axis] * (rt.head_length + rt.body_length + rt.tail_length);
        }
        self.run_time_remaining = bf.move_time;
    }

    /// Re-shape the current block in place into a pure deceleration.
    fn enter_hold_deceleration(&mut self) {
        let rt = &mut self.rt;
        if rt.section == Section::Tail {
            // Already decelerating; don't decelerate the deceleration.
            self.hold_state = if fp_zero(rt.exit_velocity) {
                HoldState::DecelToZero
            } else {
                HoldState::DecelContinue
            };
            return;
        }

        rt.entry_velocity = rt.segment_velocity;
        if rt.section == Section::Head && rt.section_state == SectionState::SecondHalf {
            // Account for the velocity of the segment about to emit.
            rt.entry_velocity += rt.fwd.f5;
        }
        rt.cruise_velocity = rt.entry_velocity;
        rt.section = Section::Tail;
        rt.section_state = SectionState::New;
        rt.head_length = 0.0;
        rt.head_time = 0.0;
        rt.body_length = 0.0;
        rt.body_time = 0.0;

        let available_length = axis_vector_length(&rt.target, &rt.position);
        let braking_length = target_length(0.0, rt.cruise_velocity, &rt.jt);

        if fp_zero(available_length - braking_length) {
            // The deceleration is almost exactly the remaining block.
            self.hold_state = HoldState::DecelToZero;
            rt.exit_velocity = 0.0;
            rt.tail_length = available_length;
        } else if available_length < braking_length {
            // Not enough room: bleed off what we can and carry the rest
            // of the deceleration into the next block.
            self.hold_state = HoldState::DecelContinue;
            rt.tail_length = available_length;
            rt.exit_velocity =
                rt.cruise_velocity - target_velocity(0.0, rt.tail_length, &rt.jt);
        } else {
            // Fits in the current block.
            self.hold_state = HoldState::DecelToZero;
            rt.exit_velocity = 0.0;
            rt.tail_length = braking_length;
        }
        rt.tail_time = rt.tail_length * 2.0 / (rt.exit_velocity + rt.cruise_velocity);
        debug!(
            entry = rt.entry_velocity,
            tail_mm = rt.tail_length,
            state = ?self.hold_state,
            "feedhold: deceleration shaped"
        );
    }

    /// The section dispatcher. Sections with nothing to do fall through
    /// to the next; exactly one segment is staged before returning
    /// `Eagain`/`Ok`.
    fn run_sections(
        &mut self,
        prep: &mut PrepSlot,
        motors: &MotorConfig,
        encoders: Option<&mut dyn Encoders>,
    ) -> Result<Status, Alarm> {
        let mut encoders = encoders;
        loop {
            match self.rt.section {
                Section::Head => {
                    if self.rt.section_state == SectionState::New {
                        if fp_zero(self.rt.head_length) {
                            self.rt.section = Section::Body;
                            continue; // skip ahead to the body generator
                        }
                        let (v0, v1, t) = (
                            self.rt.entry_velocity,
                            self.rt.cruise_velocity,
                            self.rt.head_time,
                        );
                        self.init_section(Section::Head, v0, v1, t);
                    }
                    if self.rt.section_state == SectionState::FirstHalf {
                        // The forward differences begin their advance on
                        // the next call, keeping the first emitted
                        // velocity at the curve's first midpoint sample.
                        self.rt.section_state = SectionState::SecondHalf;
                        return Ok(Status::Eagain);
                    }
                    self.rt.segment_velocity += self.rt.fwd.f5;
                    match self.exec_segment(prep, motors, encoders.take())? {
                        SegmentOutcome::SectionDone => {
                            if fp_zero(self.rt.body_length) && fp_zero(self.rt.tail_length) {
                                return Ok(Status::Ok); // ends the block
                            }
                            self.rt.section = Section::Body;
                            self.rt.section_state = SectionState::New;
                            return Ok(Status::Eagain);
                        }
                        SegmentOutcome::More => {
                            self.rt.fwd.advance();
                            return Ok(Status::Eagain);
                        }
                        SegmentOutcome::Dropped => return Ok(Status::ZeroLengthMove),
                    }
                }
                Section::Body => {
                    if self.rt.section_state == SectionState::New {
                        if fp_zero(self.rt.body_length) {
                            self.rt.section = Section::Tail;
                            self.rt.section_state = SectionState::New;
                            continue; // skip ahead to the tail
                        }
                        let (v, t) = (self.rt.cruise_velocity, self.rt.body_time);
                        self.init_section(Section::Body, v, v, t);
                    }
                    // The body is broken into segments even though it is
                    // a straight line, so holds can begin mid-line with
                    // minimal latency.
                    match self.exec_segment(prep, motors, encoders.take())? {
                        SegmentOutcome::SectionDone => {
                            if fp_zero(self.rt.tail_length) {
                                return Ok(Status::Ok);
                            }
                            self.rt.section = Section::Tail;
                            self.rt.section_state = SectionState::New;
                            return Ok(Status::Eagain);
                        }
                        SegmentOutcome::More => return Ok(Status::Eagain),
                        SegmentOutcome::Dropped => return Ok(Status::ZeroLengthMove),
                    }
                }
                Section::Tail => {
                    if self.rt.section_state == SectionState::New {
                        if fp_zero(self.rt.tail_length) {
                            return Ok(Status::Ok); // ends the block
                        }
                        let (v0, v1, t) = (
                            self.rt.cruise_velocity,
                            self.rt.exit_velocity,
                            self.rt.tail_time,
                        );
                        self.init_section(Section::Tail, v0, v1, t);
                    }
                    if self.rt.section_state == SectionState::FirstHalf {
                        self.rt.section_state = SectionState::SecondHalf;
                        return Ok(Status::Eagain);
                    }
                    self.rt.segment_velocity += self.rt.fwd.f5;
                    match self.exec_segment(prep, motors, encoders.take())? {
                        SegmentOutcome::SectionDone => return Ok(Status::Ok),
                        SegmentOutcome::More => {
                            self.rt.fwd.advance();
                            return Ok(Status::Eagain);
                        }
                        SegmentOutcome::Dropped => return Ok(Status::ZeroLengthMove),
                    }
                }
            }
        }
    }

    /// Slice a section into nominal-length segments and set up the
    /// velocity iterator.
    fn init_section(&mut self, section: Section, v0: f64, v1: f64, time: f64) {
        let rt = &mut self.rt;
        rt.segments = (usec(time) / NOM_SEGMENT_USEC).ceil();
        rt.segment_time = time / rt.segments;
        rt.segment_count = rt.segments as u32;

        if section == Section::Body {
            rt.segment_velocity = v0;
            rt.fwd.clear();
            rt.section_state = SectionState::SecondHalf;
        } else if rt.segment_count == 1 {
            // One segment: average the velocities, nothing to iterate.
            rt.segment_velocity = (v0 + v1) / 2.0;
            rt.fwd.clear();
            rt.section_state = SectionState::SecondHalf;
        } else {
            rt.segment_velocity = rt.fwd.init(v0, v1, 0.0, 0.0, 0.0, 0.0, time, rt.segments);
            rt.section_state = SectionState::FirstHalf;
        }

        if rt.segment_time < MIN_SEGMENT_TIME {
            // Collapse to a single averaged segment rather than emit a
            // segment the loader cannot honor.
            rt.segments = 1.0;
            rt.segment_count = 1;
            rt.segment_time = time;
            rt.segment_velocity = (v0 + v1) / 2.0;
            rt.fwd.clear();
            rt.section_state = SectionState::SecondHalf;
        }
        rt.section = section;
    }

    /// Emit one segment: fix the segment target, convert through inverse
    /// kinematics, advance the step bucket-brigade, and stage the travel
    /// into the prep slot.
    ///
    /// The commanded steps trail the target steps by one segment so they
    /// line up in time with the encoder readings; the following error is
    /// purely a statement of relative position, unaffected by direction.
    fn exec_segment(
        &mut self,
        prep: &mut PrepSlot,
        motors: &MotorConfig,
        encoders: Option<&mut dyn Encoders>,
    ) -> Result<SegmentOutcome, Alarm> {
        let rt = &mut self.rt;
        rt.segment_count -= 1;
        let last_segment = rt.segment_count == 0;

        // If the segment ends on a section waypoint, synchronize to it
        // to cancel accumulated floating-point drift. Not while going
        // into a hold: the waypoints no longer describe the path.
        if last_segment
            && rt.section_state == SectionState::SecondHalf
            && self.motion_state != MotionState::Hold
        {
            rt.gm.target = rt.waypoint[rt.section as usize];
        } else {
            let segment_length = rt.segment_velocity * rt.segment_time;
            for axis in 0..AXES {
                rt.gm.target[axis] = rt.position[axis] + rt.unit[axis] * segment_length;
            }
        }

        // Bucket-brigade the old targets down the chain before getting
        // the new target from kinematics.
        for m in 0..MOTORS {
            rt.commanded_steps[m] = rt.position_steps[m];
            rt.position_steps[m] = rt.target_steps[m];
        }
        if let Some(enc) = encoders {
            for m in 0..MOTORS {
                rt.encoder_steps[m] = enc.read_encoder(m);
            }
        } else {
            rt.encoder_steps = rt.commanded_steps;
        }
        for m in 0..MOTORS {
            rt.following_error[m] = rt.encoder_steps[m] - rt.commanded_steps[m];
        }

        inverse_kinematics(&rt.gm.target, &mut rt.target_steps, motors);
        let mut travel_steps = [0.0; MOTORS];
        for m in 0..MOTORS {
            travel_steps[m] = rt.target_steps[m] - rt.position_steps[m];
        }

        self.run_time_remaining = (self.run_time_remaining - rt.segment_time).max(0.0);

        match prep.prep_line(&travel_steps, &rt.following_error, rt.segment_time, motors) {
            Ok(()) => {}
            Err(PrepError::ZeroLengthMove) => return Ok(SegmentOutcome::Dropped),
            Err(PrepError::NotOwned) => {
                return Err(Alarm::InternalError("prep slot not owned at emission"))
            }
        }
        prep.segment_velocity = rt.segment_velocity;
        rt.position = rt.gm.target;

        Ok(if last_segment {
            SegmentOutcome::SectionDone
        } else {
            SegmentOutcome::More
        })
    }
}
