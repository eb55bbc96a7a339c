//! Move admission and planner-level commands.
//!
//! [`Planner::aline`] is the entry point for acceleration-planned lines:
//! it derives the block's geometry, move times, jerk, and velocity caps,
//! and commits a buffer for the look-ahead passes. Dwells and
//! synchronous commands thread through the same ring so they execute in
//! order with motion.

use stepgen::MotorConfig;
use tracing::debug;

use crate::buffer::{BufferRing, BufferState, CommandFn, MoveType};
use crate::error::{Alarm, Status};
use crate::exec::Runtime;
use crate::gcode::{FeedRateMode, GcodeState, MotionMode, PathControl};
use crate::kinematics::inverse_kinematics;
use crate::report::{MotionSnapshot, Reporter};
use crate::settings::{Settings, SettingsError, SettingsSource};
use crate::trapezoid::{target_velocity, JerkTerms};
use crate::{
    fp_zero, HoldState, MotionState, PlannerState, AXES, AXIS_A, AXIS_B, AXIS_C, AXIS_X, AXIS_Y,
    AXIS_Z, FEED_OVERRIDE_MAX, FEED_OVERRIDE_MIN, JERK_MULTIPLIER, MOTORS,
};

/// A read-only planning snapshot of one queued block.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockPlan {
    pub move_type: MoveType,
    pub state: BufferState,
    pub length: f64,
    pub move_time: f64,
    pub unit: [f64; AXES],
    pub entry_vmax: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    pub delta_vmax: f64,
    pub junction_vmax: f64,
    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,
    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,
    pub head_time: f64,
    pub body_time: f64,
    pub tail_time: f64,
    pub jerk: f64,
    pub replannable: bool,
}

/// The motion planner: buffer ring, runtime context, and planning state.
///
/// One instance per machine. All memory is owned inline; nothing is
/// allocated after construction.
pub struct Planner {
    pub(crate) ring: BufferRing,
    pub(crate) rt: Runtime,
    pub(crate) settings: Settings,
    /// Final planned position — where the next admitted move starts.
    pub(crate) position: [f64; AXES],
    pub(crate) planner_state: PlannerState,
    pub(crate) motion_state: MotionState,
    pub(crate) hold_state: HoldState,
    /// Set when a block is committed; consumed by the planner callback.
    pub(crate) new_block: bool,
    /// Set to force a planning pass regardless of arrival state.
    pub(crate) request_planning: bool,
    pub(crate) new_block_deadline_ms: f64,
    pub(crate) new_block_timeout: bool,
    /// Planned time queued ahead of the runtime, minutes.
    pub(crate) plannable_time: f64,
    /// Time left in the running block, minutes.
    pub(crate) run_time_remaining: f64,
    override_factor: f64,
    override_enabled: bool,
}

impl Planner {
    pub fn new(settings: Settings) -> Self {
        Self {
            ring: BufferRing::new(),
            rt: Runtime::new(),
            settings,
            position: [0.0; AXES],
            planner_state: PlannerState::Idle,
            motion_state: MotionState::Stop,
            hold_state: HoldState::Off,
            new_block: false,
            request_planning: false,
            new_block_deadline_ms: 0.0,
            new_block_timeout: false,
            plannable_time: 0.0,
            run_time_remaining: 0.0,
            override_factor: 1.0,
            override_enabled: false,
        }
    }

    /// Tear down all planning state and start over. Settings survive.
    pub fn reset(&mut self) {
        let settings = self.settings.clone();
        *self = Planner::new(settings);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Apply a configuration token to the live settings.
    pub fn apply_setting(&mut self, token: &str, value: f64) -> Result<(), SettingsError> {
        self.settings.apply(token, value)
    }

    /// Apply a token and write it through to the provider.
    pub fn store_setting(
        &mut self,
        source: &mut impl SettingsSource,
        token: &str,
        value: f64,
    ) -> Result<(), SettingsError> {
        self.settings.set_and_store(source, token, value)
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion_state
    }

    pub fn hold_state(&self) -> HoldState {
        self.hold_state
    }

    pub fn planner_state(&self) -> PlannerState {
        self.planner_state
    }

    /// Where the next admitted move will start.
    pub fn planner_position(&self, axis: usize) -> f64 {
        self.position[axis]
    }

    /// Overwrite the planner position (homing, coordinate rotation).
    pub fn set_planner_position(&mut self, axis: usize, position: f64) {
        self.position[axis] = position;
    }

    /// EMPTY buffers remaining.
    pub fn planner_buffers_available(&self) -> usize {
        self.ring.buffers_available
    }

    /// True when upstream must stop feeding new lines.
    pub fn planner_is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// True while the queue holds anything runnable.
    pub fn has_runnable_buffer(&self) -> bool {
        self.ring.has_runnable()
    }

    /// True if the planner horizon is deep enough that non-essential
    /// work (reports, persistence) can run without risking starvation.
    pub fn is_phat_city_time(&self) -> bool {
        if self.hold_state == HoldState::Hold {
            return true;
        }
        self.plannable_time <= 0.0 || self.plannable_time > crate::PHAT_CITY_TIME
    }

    /// Advisory snapshot for the reporter.
    pub fn snapshot(&self) -> MotionSnapshot {
        MotionSnapshot {
            position: self.rt.position,
            velocity: self.rt.segment_velocity,
            buffers_available: self.ring.buffers_available,
            motion_state: self.motion_state,
            planner_state: self.planner_state,
        }
    }

    /// Validate planner memory integrity and state-machine sanity.
    pub fn test_assertions(&self) -> Result<(), Alarm> {
        self.ring.assertions()
    }

    /// Planning snapshots of every queued block, oldest first. Advisory:
    /// intended for diagnostics and reporting.
    pub fn queued_blocks(&self) -> Vec<BlockPlan> {
        let mut blocks = Vec::new();
        let mut idx = self.ring.r;
        loop {
            let b = self.ring.buf(idx);
            if b.state == BufferState::Empty {
                break;
            }
            blocks.push(BlockPlan {
                move_type: b.move_type,
                state: b.state,
                length: b.length,
                move_time: b.move_time,
                unit: b.unit,
                entry_vmax: b.entry_vmax,
                cruise_vmax: b.cruise_vmax,
                exit_vmax: b.exit_vmax,
                delta_vmax: b.delta_vmax,
                junction_vmax: b.junction_vmax,
                entry_velocity: b.entry_velocity,
                cruise_velocity: b.cruise_velocity,
                exit_velocity: b.exit_velocity,
                head_length: b.head_length,
                body_length: b.body_length,
                tail_length: b.tail_length,
                head_time: b.head_time,
                body_time: b.body_time,
                tail_time: b.tail_time,
                jerk: b.jerk,
                replannable: b.replannable,
            });
            idx = self.ring.nx_of(idx);
            if idx == self.ring.r {
                break;
            }
        }
        blocks
    }

    /// Invalidate all queued plans and request a fresh planning pass.
    /// Call after changing settings that affect queued blocks.
    pub fn force_replan(&mut self) {
        let from = self.ring.r;
        self.replan_queue(from);
    }

    /// Plan a line with acceleration and deceleration management.
    ///
    /// Uses constant-jerk motion equations: jerk, the third derivative
    /// of position, is the controlled quantity. Returning a status other
    /// than `Ok` means the endpoint was NOT advanced, so lines too short
    /// to move accumulate until the error exceeds the minimum.
    pub fn aline(
        &mut self,
        gm_in: &GcodeState,
        reporter: &mut dyn Reporter,
    ) -> Result<Status, Alarm> {
        let mut gm = *gm_in;

        let mut axis_length = [0.0; AXES];
        let mut axis_square = [0.0; AXES];
        let mut length_square = 0.0;
        for axis in 0..AXES {
            axis_length[axis] = gm.target[axis] - self.position[axis];
            axis_square[axis] = axis_length[axis] * axis_length[axis];
            length_square += axis_square[axis];
        }
        let length = length_square.sqrt();

        // Exit if the move has zero movement. At all.
        if fp_zero(length) {
            reporter.request_status_report();
            return Ok(Status::MinimumLengthMove);
        }

        calculate_move_times(&self.settings, &mut gm, &axis_length, &axis_square);
        let requested_time = gm.move_time;
        if self.override_enabled && gm.motion_mode == MotionMode::StraightFeed {
            gm.move_time = (gm.move_time / self.override_factor).max(gm.minimum_time);
        }

        // Never supposed to fail: upstream gates on ring fullness.
        let Some(idx) = self.ring.get_write_buffer() else {
            let alarm = Alarm::BufferFullFatal("no write buffer in aline");
            reporter.exception(alarm);
            return Err(alarm);
        };
        let pv_unit = self.ring.buf(self.ring.pv_of(idx)).unit;

        let jerk = calculate_jerk(&axis_length, length, &self.settings);
        let jt = JerkTerms::new(jerk);

        let bf = self.ring.buf_mut(idx);
        bf.length = length;
        for axis in 0..AXES {
            bf.unit[axis] = axis_length[axis] / length;
            bf.axis_flags[axis] = bf.unit[axis].abs() > 0.0;
        }
        bf.gm = gm;
        bf.jerk = jt.jerk;
        bf.recip_jerk = jt.recip_jerk;
        bf.cbrt_jerk = jt.cbrt_jerk;

        bf.cruise_vset = length / requested_time;
        bf.cruise_vmax = length / gm.move_time;
        bf.delta_vmax = target_velocity(0.0, length, &jt);
        bf.braking_velocity = bf.delta_vmax;

        if gm.path_control == PathControl::ExactStop {
            bf.entry_vmax = 0.0;
            bf.exit_vmax = 0.0;
            bf.replannable = false;
        } else {
            bf.junction_vmax =
                junction_vmax(bf.cruise_vmax, &pv_unit, &bf.unit, &self.settings);
            bf.entry_vmax = bf.junction_vmax;
            bf.exit_vmax = bf.cruise_vmax.min(bf.entry_vmax + bf.delta_vmax);
            bf.replannable = true;
        }
        bf.state = BufferState::InProcess;

        // These two must stay in exact order: position updates before the
        // buffer is committed.
        self.position = gm.target;
        self.ring.commit_write_buffer(MoveType::Aline);
        self.block_committed(reporter);
        Ok(Status::Ok)
    }

    /// Queue a dwell. Timed by the stepper layer on a separate timer; no
    /// step pins are touched while it runs.
    pub fn dwell(&mut self, seconds: f64, reporter: &mut dyn Reporter) -> Result<Status, Alarm> {
        let Some(idx) = self.ring.get_write_buffer() else {
            let alarm = Alarm::FailedGetPlannerBuffer("no write buffer for dwell");
            reporter.exception(alarm);
            return Err(alarm);
        };
        let bf = self.ring.buf_mut(idx);
        bf.dwell_seconds = seconds;
        bf.move_time = seconds / 60.0;
        self.ring.commit_write_buffer(MoveType::Dwell);
        self.block_committed(reporter);
        Ok(Status::Ok)
    }

    /// Queue a synchronous command. The callback runs when the block
    /// reaches the front of the queue and all prior motion has drained,
    /// which keeps holds, flushes, and queue starvation manageable.
    pub fn queue_command(
        &mut self,
        cm_func: CommandFn,
        value: &[f64; AXES],
        flags: &[bool; AXES],
        reporter: &mut dyn Reporter,
    ) -> Result<Status, Alarm> {
        let Some(idx) = self.ring.get_write_buffer() else {
            let alarm = Alarm::FailedGetPlannerBuffer("no write buffer for command");
            reporter.exception(alarm);
            return Err(alarm);
        };
        let bf = self.ring.buf_mut(idx);
        bf.cm_func = Some(cm_func);
        bf.value_vector = *value;
        bf.axis_flags = *flags;
        self.ring.commit_write_buffer(MoveType::Command);
        self.block_committed(reporter);
        Ok(Status::Ok)
    }

    /// Execute a command block that reached the runtime. Invoked by the
    /// pump when the loader surfaces it.
    pub fn runtime_command(
        &mut self,
        idx: usize,
        reporter: &mut dyn Reporter,
    ) -> Result<Status, Alarm> {
        let bf = self.ring.buf(idx);
        let Some(func) = bf.cm_func else {
            let alarm = Alarm::InternalError("command block with no callback");
            reporter.exception(alarm);
            return Err(alarm);
        };
        func(&bf.value_vector, &bf.axis_flags);
        if self.ring.free_run_buffer() && self.hold_state == HoldState::Off {
            self.cycle_end();
        }
        reporter.queue_report(self.ring.buffers_available);
        Ok(Status::Ok)
    }

    /// Apply a feed override factor to newly admitted and queued feed
    /// blocks. Takes effect immediately; queued blocks are re-planned.
    pub fn start_feed_override(&mut self, factor: f64) {
        let factor = factor.clamp(FEED_OVERRIDE_MIN, FEED_OVERRIDE_MAX);
        self.override_factor = factor;
        self.override_enabled = true;
        debug!(factor, "feed override engaged");
        if self.planner_state != PlannerState::Idle {
            self.apply_override_to_queue();
            self.replan_queue(self.ring.r);
        }
    }

    /// Remove the feed override.
    pub fn end_feed_override(&mut self) {
        self.override_factor = 1.0;
        self.override_enabled = false;
        if self.planner_state != PlannerState::Idle {
            self.apply_override_to_queue();
            self.replan_queue(self.ring.r);
        }
    }

    fn apply_override_to_queue(&mut self) {
        let factor = if self.override_enabled {
            self.override_factor
        } else {
            1.0
        };
        let mut idx = self.ring.r;
        loop {
            let bf = self.ring.buf_mut(idx);
            if bf.state == BufferState::Empty {
                break;
            }
            if bf.state != BufferState::Running
                && bf.move_type == MoveType::Aline
                && bf.gm.motion_mode == MotionMode::StraightFeed
                && bf.cruise_vset > 0.0
            {
                let requested_time = bf.length / bf.cruise_vset;
                let time = (requested_time / factor).max(bf.gm.minimum_time);
                bf.gm.move_time = time;
                bf.cruise_vmax = bf.length / time;
                bf.entry_vmax = bf.junction_vmax.min(bf.cruise_vmax);
                bf.exit_vmax = bf.cruise_vmax.min(bf.entry_vmax + bf.delta_vmax);
            }
            idx = self.ring.nx_of(idx);
            if idx == self.ring.r {
                break;
            }
        }
    }

    /// Discard all queued blocks. Valid once motion has stopped (held or
    /// idle); the planner position collapses to the runtime position.
    pub fn request_queue_flush(&mut self, motors: &MotorConfig) {
        if self.hold_state != HoldState::Hold && self.motion_state != MotionState::Stop {
            return;
        }
        self.ring = BufferRing::new();
        self.rt.reset_block();
        self.position = self.rt.position;
        self.set_steps_to_runtime_position(motors);
        self.planner_state = PlannerState::Idle;
        self.motion_state = MotionState::Stop;
        self.hold_state = HoldState::Off;
        self.new_block = false;
        self.request_planning = false;
        self.plannable_time = 0.0;
        self.run_time_remaining = 0.0;
        debug!("planner queue flushed");
    }

    /// Align the step counters to the current runtime position so the
    /// next segment starts with zero following error.
    pub fn set_steps_to_runtime_position(&mut self, motors: &MotorConfig) {
        let mut steps = [0.0; MOTORS];
        inverse_kinematics(&self.rt.position, &mut steps, motors);
        self.rt.target_steps = steps;
        self.rt.position_steps = steps;
        self.rt.commanded_steps = steps;
        self.rt.encoder_steps = steps;
        self.rt.following_error = [0.0; MOTORS];
    }

    pub(crate) fn block_committed(&mut self, reporter: &mut dyn Reporter) {
        self.new_block = true;
        if self.motion_state == MotionState::Stop {
            self.motion_state = MotionState::Planning;
        }
        reporter.queue_report(self.ring.buffers_available);
    }

    pub(crate) fn cycle_end(&mut self) {
        self.motion_state = MotionState::Stop;
        self.run_time_remaining = 0.0;
        debug!("cycle end: planner drained");
    }
}

/// Compute optimal and minimum move times into the machine state.
///
/// "Minimum time" is the fastest the move can be performed given the
/// velocity constraints of the participating axes, regardless of the
/// requested feed — the binding-axis time, recorded for feed override.
/// "Optimal time" is the longest of: the inverse-time value (the whole
/// block time under inverse-time feed), the Cartesian XYZ path time at
/// the requested feed, the rotary-only time when XYZ doesn't move, and
/// the minimum time.
pub(crate) fn calculate_move_times(
    settings: &Settings,
    gm: &mut GcodeState,
    axis_length: &[f64; AXES],
    axis_square: &[f64; AXES],
) {
    let mut inv_time = 0.0;
    let mut xyz_time = 0.0;
    let mut abc_time = 0.0;
    let mut max_time: f64 = 0.0;

    if gm.motion_mode != MotionMode::StraightTraverse {
        if gm.feed_rate_mode == FeedRateMode::InverseTime {
            inv_time = gm.feed_rate; // already un-inverted to minutes
            gm.feed_rate_mode = FeedRateMode::UnitsPerMinute;
        } else if gm.feed_rate > 0.0 {
            // Linear path length over mm/min feed.
            xyz_time = (axis_square[AXIS_X] + axis_square[AXIS_Y] + axis_square[AXIS_Z]).sqrt()
                / gm.feed_rate;
            if fp_zero(xyz_time) {
                // No linear movement: rotary path in degrees over
                // degrees/min feed.
                abc_time = (axis_square[AXIS_A] + axis_square[AXIS_B] + axis_square[AXIS_C])
                    .sqrt()
                    / gm.feed_rate;
            }
        }
    }
    for axis in 0..AXES {
        let limit = if gm.motion_mode == MotionMode::StraightTraverse {
            settings.axes[axis].velocity_max
        } else {
            settings.axes[axis].feedrate_max
        };
        max_time = max_time.max(axis_length[axis].abs() / limit);
    }
    gm.minimum_time = max_time;
    gm.move_time = inv_time.max(max_time).max(xyz_time).max(abc_time);
}

/// Derive the block's jerk from the limit-binding axis.
///
/// For each participating axis the configured maximum is scaled by the
/// reciprocal of that axis's unit-vector term; the smallest result is
/// the jerk the whole move can sustain without any axis exceeding its
/// own limit. The ×1e6 multiplier restores engineering units from the
/// configured value.
pub(crate) fn calculate_jerk(axis_length: &[f64; AXES], length: f64, settings: &Settings) -> f64 {
    let mut jerk = f64::INFINITY;
    for axis in 0..AXES {
        let unit = (axis_length[axis] / length).abs();
        if unit > 0.0 {
            let candidate = settings.axes[axis].jerk_max / unit;
            if candidate < jerk {
                jerk = candidate;
            }
        }
    }
    jerk * JERK_MULTIPLIER
}

/// Maximum velocity through the junction of two unit vectors.
///
/// Places a circle tangent to both lines; the junction deviation sets
/// the distance from the corner to the circle, which fixes the radius
/// and thereby the velocity that keeps centripetal acceleration within
/// the configured budget. Widening the deviation widens the racing line.
/// The per-axis deviations are fused by weighting each with the unit
/// vector components, so axes with different dynamics shape the corner
/// anisotropically.
pub fn junction_vmax(
    vmax: f64,
    a_unit: &[f64; AXES],
    b_unit: &[f64; AXES],
    settings: &Settings,
) -> f64 {
    // Cosine of the deflection angle between arriving and departing
    // vectors — note the sign.
    let mut costheta = 0.0;
    for axis in 0..AXES {
        costheta -= a_unit[axis] * b_unit[axis];
    }
    if costheta < -0.99 {
        return vmax; // straight line
    }
    if costheta > 0.99 {
        return 0.0; // reversal
    }

    let mut a_delta = 0.0;
    let mut b_delta = 0.0;
    for axis in 0..AXES {
        let dev = settings.axes[axis].junction_dev;
        a_delta += (a_unit[axis] * dev) * (a_unit[axis] * dev);
        b_delta += (b_unit[axis] * dev) * (b_unit[axis] * dev);
    }
    let delta = (a_delta.sqrt() + b_delta.sqrt()) / 2.0;

    // Half-angle identity avoids the acos/sin pair.
    let sintheta_over2 = ((1.0 - costheta) / 2.0).sqrt();
    let radius = delta * sintheta_over2 / (1.0 - sintheta_over2);
    let acceleration = settings.sys.junction_acceleration * settings.sys.junction_aggression;
    vmax.min((radius * acceleration).sqrt())
}
