//! Per-motor configuration: geometry, polarity, and power management.

use crate::MOTORS;

/// Motor power management policy.
///
/// The DDA-exhaustion transition is the hook for `PoweredWhenMoving`; the
/// runtime-idle (cycle end) transition is the hook for `PoweredInCycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerMode {
    /// Motor stays energized at all times.
    #[default]
    AlwaysPowered,
    /// Motor is never energized.
    Disabled,
    /// Energized from cycle start until the machine returns to idle.
    PoweredInCycle,
    /// Energized only while its axis is actually moving.
    PoweredWhenMoving,
}

impl PowerMode {
    /// Decode a numeric config value (0..=3). Out-of-range values fall
    /// back to always-powered.
    pub fn from_config(value: f64) -> Self {
        match value as i64 {
            1 => PowerMode::Disabled,
            2 => PowerMode::PoweredInCycle,
            3 => PowerMode::PoweredWhenMoving,
            _ => PowerMode::AlwaysPowered,
        }
    }
}

/// Static configuration for one motor channel.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorSettings {
    /// Axis index this motor is mapped to.
    pub axis: usize,
    /// Full-step angle in degrees.
    pub step_angle: f64,
    /// Linear travel per motor revolution, in mm (or degrees for rotary).
    pub travel_per_rev: f64,
    /// Microstep divisor.
    pub microsteps: u32,
    /// Reverses the direction sense when true.
    pub polarity: bool,
    /// Power management policy.
    pub power_mode: PowerMode,
}

impl MotorSettings {
    /// Steps per unit of travel (microsteps included).
    pub fn steps_per_unit(&self) -> f64 {
        (360.0 / self.step_angle) * self.microsteps as f64 / self.travel_per_rev
    }
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            axis: 0,
            step_angle: 1.8,
            travel_per_rev: 40.0,
            microsteps: 8,
            polarity: false,
            power_mode: PowerMode::AlwaysPowered,
        }
    }
}

/// Configuration for the whole motor bank plus the loader tuning knobs.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorConfig {
    pub motors: [MotorSettings; MOTORS],
    /// Anti-stall heuristic: reset the DDA phase counters when the new
    /// segment's tick count is smaller than the previous one divided by
    /// this factor. A tuning constant, not an invariant.
    pub counter_reset_factor: u32,
}

impl MotorConfig {
    /// Identity-mapped bank: motor N drives axis N.
    pub fn new() -> Self {
        let mut motors = [MotorSettings::default(); MOTORS];
        for (i, m) in motors.iter_mut().enumerate() {
            m.axis = i;
        }
        Self {
            motors,
            counter_reset_factor: 2,
        }
    }

    /// Steps per unit for one motor.
    pub fn steps_per_unit(&self, motor: usize) -> f64 {
        self.motors[motor].steps_per_unit()
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_per_unit_from_geometry() {
        let m = MotorSettings {
            step_angle: 1.8,
            travel_per_rev: 40.0,
            microsteps: 8,
            ..MotorSettings::default()
        };
        // 200 full steps/rev * 8 microsteps / 40 mm/rev = 40 steps/mm
        assert!((m.steps_per_unit() - 40.0).abs() < 1e-12);
    }

    #[test]
    fn power_mode_decoding() {
        assert_eq!(PowerMode::from_config(0.0), PowerMode::AlwaysPowered);
        assert_eq!(PowerMode::from_config(3.0), PowerMode::PoweredWhenMoving);
        assert_eq!(PowerMode::from_config(9.0), PowerMode::AlwaysPowered);
    }
}
