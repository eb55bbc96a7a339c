//! The simulated board: pins, encoders, and a pulse trace.
//!
//! Stands in for the pin-level HAL. Step pulses integrate into signed
//! per-motor positions using the last direction written, and the same
//! positions serve as ideal encoders, so following error reflects only
//! the pipeline's own latency.

use motion::MOTORS;
use serde::{Deserialize, Serialize};
use stepgen::{Encoders, StepPins};

/// One recorded step pulse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PulseEvent {
    /// Simulation time in seconds.
    pub t: f64,
    pub motor: u8,
}

/// Simulated pin state and trace capture.
#[derive(Debug, Default)]
pub struct SimBoard {
    /// Signed step position per motor, integrated from pulses.
    pub step_position: [i64; MOTORS],
    /// Last direction written. `true` = reverse.
    pub dir: [bool; MOTORS],
    pub enabled: [bool; MOTORS],
    pub pulse_count: [u64; MOTORS],
    /// Record every pulse into `pulses` when set. Off by default; long
    /// jobs generate a lot of events.
    pub record_pulses: bool,
    pub pulses: Vec<PulseEvent>,
    /// Set by the pump before every timer tick.
    pub now_seconds: f64,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepPins for SimBoard {
    fn pulse_step(&mut self, motor: usize) {
        self.step_position[motor] += if self.dir[motor] { -1 } else { 1 };
        self.pulse_count[motor] += 1;
        if self.record_pulses {
            self.pulses.push(PulseEvent {
                t: self.now_seconds,
                motor: motor as u8,
            });
        }
    }

    fn write_dir(&mut self, motor: usize, reverse: bool) {
        self.dir[motor] = reverse;
    }

    fn write_enable(&mut self, motor: usize, enabled: bool) {
        self.enabled[motor] = enabled;
    }
}

impl Encoders for SimBoard {
    fn read_encoder(&mut self, motor: usize) -> f64 {
        self.step_position[motor] as f64
    }
}
