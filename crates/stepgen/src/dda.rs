//! The DDA step generator and dwell downcounter.
//!
//! One call to [`StepperRuntime::dda_tick`] is one firing of the
//! highest-priority timer. Per motor it adds the segment's substep count
//! into a phase accumulator and emits a pulse whenever the accumulator
//! crosses zero, subtracting the tick×substep threshold. Integer math
//! only; the float work all happened upstream in prep.

use crate::hal::StepPins;
use crate::motor::{MotorConfig, PowerMode};
use crate::MOTORS;

/// What a tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdaEvent {
    /// Timer not running; nothing happened.
    Idle,
    /// Segment still in progress.
    Running,
    /// The segment's tick budget just hit zero. The caller must run the
    /// loader to install the next segment (or stop).
    SegmentDone,
}

#[derive(Debug, Clone, Copy, Default)]
struct RunMotor {
    steps: i64,
    counter: i64,
}

/// Runtime state owned by the step-generation interrupt level.
#[derive(Debug)]
pub struct StepperRuntime {
    motors: [RunMotor; MOTORS],
    /// Remaining ticks in the running segment.
    pub timer_ticks_downcount: u32,
    /// Pulse threshold for the running segment.
    pub timer_ticks_x_substeps: i64,
    /// Remaining ticks in a running dwell.
    pub dwell_ticks_downcount: u32,
    dda_running: bool,
    dwell_running: bool,
}

impl StepperRuntime {
    pub fn new() -> Self {
        Self {
            motors: [RunMotor::default(); MOTORS],
            timer_ticks_downcount: 0,
            timer_ticks_x_substeps: 0,
            dwell_ticks_downcount: 0,
            dda_running: false,
            dwell_running: false,
        }
    }

    /// True while a segment or a dwell is being timed out.
    pub fn is_busy(&self) -> bool {
        self.dda_running || self.dwell_running
    }

    pub fn dda_running(&self) -> bool {
        self.dda_running
    }

    pub fn dwell_running(&self) -> bool {
        self.dwell_running
    }

    /// Install a segment and start the DDA timer. Called by the loader.
    pub(crate) fn start_segment(
        &mut self,
        steps: &[i64; MOTORS],
        ticks: u32,
        ticks_x_substeps: i64,
        counter_reset: bool,
    ) {
        self.timer_ticks_downcount = ticks;
        self.timer_ticks_x_substeps = ticks_x_substeps;
        for (m, motor) in self.motors.iter_mut().enumerate() {
            motor.steps = steps[m];
            if counter_reset {
                // Pulse-phase correction for segments with very different
                // velocities; without it the stale counter can swallow or
                // double the first pulse.
                motor.counter = -(ticks as i64);
            }
        }
        self.dda_running = ticks > 0;
    }

    /// Start timing a dwell. Called by the loader.
    pub(crate) fn start_dwell(&mut self, ticks: u32) {
        self.dwell_ticks_downcount = ticks;
        self.dwell_running = ticks > 0;
    }

    /// One firing of the DDA timer.
    pub fn dda_tick(&mut self, pins: &mut impl StepPins, config: &MotorConfig) -> DdaEvent {
        if !self.dda_running {
            return DdaEvent::Idle;
        }
        for (m, motor) in self.motors.iter_mut().enumerate() {
            motor.counter += motor.steps;
            if motor.counter > 0 {
                motor.counter -= self.timer_ticks_x_substeps;
                pins.pulse_step(m);
            }
        }
        self.timer_ticks_downcount -= 1;
        if self.timer_ticks_downcount == 0 {
            self.dda_running = false;
            for (m, settings) in config.motors.iter().enumerate() {
                if settings.power_mode == PowerMode::PoweredWhenMoving {
                    pins.write_enable(m, false);
                }
            }
            return DdaEvent::SegmentDone;
        }
        DdaEvent::Running
    }

    /// One firing of the dwell timer.
    pub fn dwell_tick(&mut self) -> DdaEvent {
        if !self.dwell_running {
            return DdaEvent::Idle;
        }
        self.dwell_ticks_downcount -= 1;
        if self.dwell_ticks_downcount == 0 {
            self.dwell_running = false;
            return DdaEvent::SegmentDone;
        }
        DdaEvent::Running
    }

    /// Stop all timing immediately. Requires a reload to recover.
    pub fn halt(&mut self) {
        self.dda_running = false;
        self.dwell_running = false;
        self.timer_ticks_downcount = 0;
        self.dwell_ticks_downcount = 0;
    }
}

impl Default for StepperRuntime {
    fn default() -> Self {
        Self::new()
    }
}
