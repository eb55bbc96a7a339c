//! Inverse kinematics: Cartesian axis targets to motor step positions.
//!
//! The machine model is motor-mapped Cartesian: each motor is bound to
//! one axis and scaled by its own steps-per-unit, derived from step
//! angle, microsteps, and travel per revolution. Segment travel is then
//! a plain difference of step positions; kinematic models that couple
//! axes would instead transform travel distances.

use stepgen::MotorConfig;

use crate::{AXES, MOTORS};

/// Map an absolute Cartesian target onto absolute motor step positions.
pub fn inverse_kinematics(
    target: &[f64; AXES],
    steps: &mut [f64; MOTORS],
    config: &MotorConfig,
) {
    for (m, motor) in config.motors.iter().enumerate() {
        steps[m] = target[motor.axis] * motor.steps_per_unit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_axes_through_steps_per_unit() {
        let mut config = MotorConfig::new();
        config.motors[1].axis = 0; // second motor ganged to X
        let target = [10.0, -2.5, 4.0, 0.0, 0.0, 0.0];
        let mut steps = [0.0; MOTORS];
        inverse_kinematics(&target, &mut steps, &config);

        let spu = config.steps_per_unit(0);
        assert!((steps[0] - 10.0 * spu).abs() < 1e-9);
        assert!((steps[1] - 10.0 * spu).abs() < 1e-9, "ganged motor follows X");
        assert!((steps[2] - 4.0 * config.steps_per_unit(2)).abs() < 1e-9);
    }
}
