//! The exec → loader handoff slot.
//!
//! A single-producer/single-consumer slot synchronized by one `owner`
//! flag. The exec stage fills the slot while it owns it, then publishes
//! ownership to the loader with release semantics; the loader reads the
//! flag with acquire semantics before touching the payload. The payload
//! itself is a snapshot, so the DDA frequency and substep scaling used by
//! the consumer are exactly the ones the producer computed with.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::motor::MotorConfig;
use crate::{frequency_to_period, DDA_SUBSTEPS, FREQUENCY_DDA, FREQUENCY_DWELL, MOTORS};

const MINUTES_TO_SECONDS: f64 = 60.0;
const TIME_EPSILON: f64 = 1e-12;

/// Who may touch the slot contents right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepOwner {
    Exec = 0,
    Loader = 1,
}

/// What the staged payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrepMove {
    /// Keeps the loader happy; performs no action.
    #[default]
    Null,
    /// One segment of an acceleration-planned line.
    Aline,
    /// A timed pause with no step emission.
    Dwell,
    /// A queued synchronous command; carries the planner buffer index.
    Command,
}

/// Errors surfaced by the prep routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PrepError {
    /// The slot is not currently owned by the exec stage. Indicates a
    /// sequencing violation upstream.
    #[error("prep slot is not owned by exec")]
    NotOwned,
    /// The segment time is non-finite or below epsilon. Benign; the
    /// segment is dropped.
    #[error("zero length move: bad segment time")]
    ZeroLengthMove,
}

/// Per-motor staging values for one segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepMotor {
    /// Substep-scaled step count for the whole segment. This is the
    /// per-tick accumulator increment on the DDA side.
    pub steps: i64,
    /// Direction bit after polarity correction. `true` = reverse.
    pub dir: bool,
}

/// The staging slot between exec and loader.
#[derive(Debug)]
pub struct PrepSlot {
    owner: AtomicU8,
    armed: bool,
    pub move_type: PrepMove,
    pub motors: [PrepMotor; MOTORS],
    /// DDA (or dwell) clock period in seconds.
    pub timer_period: f64,
    /// Tick budget for the segment (unscaled).
    pub timer_ticks: u32,
    /// Tick budget multiplied by the substep scale; the DDA pulse
    /// threshold.
    pub timer_ticks_x_substeps: i64,
    /// Reset the phase counters on load (anti-stall).
    pub counter_reset: bool,
    /// Planner buffer index for a staged command.
    pub command_buffer: u8,
    /// Most recent following error per motor, for reporting only.
    pub following_error: [f64; MOTORS],
    /// Velocity of the staged segment, for reporting only.
    pub segment_velocity: f64,
    prev_ticks: u32,
}

impl PrepSlot {
    pub fn new() -> Self {
        Self {
            owner: AtomicU8::new(PrepOwner::Exec as u8),
            armed: false,
            move_type: PrepMove::Null,
            motors: [PrepMotor::default(); MOTORS],
            timer_period: frequency_to_period(FREQUENCY_DDA),
            timer_ticks: 0,
            timer_ticks_x_substeps: 0,
            counter_reset: false,
            command_buffer: 0,
            following_error: [0.0; MOTORS],
            segment_velocity: 0.0,
            prev_ticks: 0,
        }
    }

    /// Current owner, with acquire ordering so the payload written before
    /// the last handoff is visible.
    pub fn owner(&self) -> PrepOwner {
        if self.owner.load(Ordering::Acquire) == PrepOwner::Loader as u8 {
            PrepOwner::Loader
        } else {
            PrepOwner::Exec
        }
    }

    /// True when a payload has been staged and not yet consumed.
    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Publish the staged payload to the loader. Must be the last thing
    /// the producer does.
    pub fn hand_to_loader(&mut self) {
        self.owner.store(PrepOwner::Loader as u8, Ordering::Release);
    }

    /// Return the slot to the exec stage after consuming the payload.
    pub fn hand_to_exec(&mut self) {
        self.armed = false;
        self.owner.store(PrepOwner::Exec as u8, Ordering::Release);
    }

    /// Stage one line segment.
    ///
    /// `travel_steps` are signed, possibly fractional, per-motor step
    /// deltas; `segment_time` is in minutes. Returns
    /// [`PrepError::ZeroLengthMove`] (benign) for degenerate times.
    pub fn prep_line(
        &mut self,
        travel_steps: &[f64; MOTORS],
        following_error: &[f64; MOTORS],
        segment_time: f64,
        config: &MotorConfig,
    ) -> Result<(), PrepError> {
        // Trap conditions that would prevent queuing the segment.
        if self.owner() != PrepOwner::Exec {
            return Err(PrepError::NotOwned);
        }
        if !segment_time.is_finite() || segment_time < TIME_EPSILON {
            return Err(PrepError::ZeroLengthMove);
        }
        self.counter_reset = false;

        for (m, prep) in self.motors.iter_mut().enumerate() {
            prep.dir = (travel_steps[m] < 0.0) ^ config.motors[m].polarity;
            prep.steps = (travel_steps[m] * DDA_SUBSTEPS).abs() as i64;
        }
        self.following_error = *following_error;

        let seconds = segment_time * MINUTES_TO_SECONDS;
        self.timer_period = frequency_to_period(FREQUENCY_DDA);
        self.timer_ticks = (seconds * FREQUENCY_DDA) as u32;
        // Multiplied as integers; collapsing this into one float product
        // accumulates position error over long jobs.
        self.timer_ticks_x_substeps = self.timer_ticks as i64 * DDA_SUBSTEPS as i64;

        // Anti-stall: if the velocity jump between segments is too great
        // the stale phase counters could swallow the first pulses.
        if self
            .timer_ticks
            .saturating_mul(config.counter_reset_factor)
            < self.prev_ticks
        {
            self.counter_reset = true;
        }
        self.prev_ticks = self.timer_ticks;

        self.move_type = PrepMove::Aline;
        self.armed = true;
        Ok(())
    }

    /// Stage a dwell of the given duration in seconds.
    pub fn prep_dwell(&mut self, seconds: f64) {
        self.move_type = PrepMove::Dwell;
        self.timer_period = frequency_to_period(FREQUENCY_DWELL);
        self.timer_ticks = (seconds * FREQUENCY_DWELL) as u32;
        self.armed = true;
    }

    /// Stage a synchronous command by planner buffer index.
    pub fn prep_command(&mut self, buffer_index: u8) {
        self.move_type = PrepMove::Command;
        self.command_buffer = buffer_index;
        self.armed = true;
    }

    /// Stage a null move. Keeps the loader discipline intact when there
    /// is nothing to run.
    pub fn prep_null(&mut self) {
        self.move_type = PrepMove::Null;
        self.armed = false;
    }
}

impl Default for PrepSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOM_SEGMENT_MIN: f64 = 1.5 / 60_000.0; // 1.5 ms in minutes

    #[test]
    fn line_prep_computes_ticks_and_substeps() {
        let mut slot = PrepSlot::new();
        let config = MotorConfig::new();
        let travel = [5.0, -3.25, 0.0, 0.0, 0.0, 0.0];
        let ferr = [0.0; MOTORS];

        slot.prep_line(&travel, &ferr, NOM_SEGMENT_MIN, &config)
            .expect("prep should succeed");

        // 1.5 ms at 50 kHz = 75 ticks
        assert_eq!(slot.timer_ticks, 75);
        assert_eq!(slot.timer_ticks_x_substeps, 75 * 100_000);
        assert_eq!(slot.motors[0].steps, 500_000);
        assert!(!slot.motors[0].dir);
        assert_eq!(slot.motors[1].steps, 325_000);
        assert!(slot.motors[1].dir);
        assert_eq!(slot.move_type, PrepMove::Aline);
        assert!(slot.armed());
    }

    #[test]
    fn polarity_inverts_direction_bit() {
        let mut slot = PrepSlot::new();
        let mut config = MotorConfig::new();
        config.motors[0].polarity = true;
        let travel = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let ferr = [0.0; MOTORS];

        slot.prep_line(&travel, &ferr, NOM_SEGMENT_MIN, &config)
            .expect("prep should succeed");
        assert!(slot.motors[0].dir, "positive travel with reversed polarity");
    }

    #[test]
    fn degenerate_segment_time_is_benign() {
        let mut slot = PrepSlot::new();
        let config = MotorConfig::new();
        let travel = [1.0; MOTORS];
        let ferr = [0.0; MOTORS];

        let err = slot
            .prep_line(&travel, &ferr, 0.0, &config)
            .expect_err("zero time must be rejected");
        assert_eq!(err, PrepError::ZeroLengthMove);
        assert!(!slot.armed());

        let err = slot
            .prep_line(&travel, &ferr, f64::NAN, &config)
            .expect_err("NaN time must be rejected");
        assert_eq!(err, PrepError::ZeroLengthMove);
    }

    #[test]
    fn counter_reset_fires_on_large_velocity_drop() {
        let mut slot = PrepSlot::new();
        let config = MotorConfig::new();
        let travel = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let ferr = [0.0; MOTORS];

        // Long segment first, then one less than half as long.
        slot.prep_line(&travel, &ferr, 10.0 * NOM_SEGMENT_MIN, &config)
            .expect("prep should succeed");
        assert!(!slot.counter_reset);
        slot.prep_line(&travel, &ferr, NOM_SEGMENT_MIN, &config)
            .expect("prep should succeed");
        assert!(slot.counter_reset);
    }

    #[test]
    fn ownership_round_trip() {
        let mut slot = PrepSlot::new();
        assert_eq!(slot.owner(), PrepOwner::Exec);
        slot.hand_to_loader();
        assert_eq!(slot.owner(), PrepOwner::Loader);

        // Writes while the loader owns the slot are refused.
        let config = MotorConfig::new();
        let err = slot
            .prep_line(&[0.0; MOTORS], &[0.0; MOTORS], NOM_SEGMENT_MIN, &config)
            .expect_err("exec must not write a loader-owned slot");
        assert_eq!(err, PrepError::NotOwned);

        slot.hand_to_exec();
        assert_eq!(slot.owner(), PrepOwner::Exec);
        assert!(!slot.armed());
    }
}
