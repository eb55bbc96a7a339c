//! Hardware abstraction traits implemented by a board (or a simulator).

/// Pin-level stepper interface driven by the loader and the DDA tick.
///
/// `pulse_step` is a one-shot: the pin goes high and returns low on its
/// own, with a pulse width at or above the driver minimum. Direction and
/// enable are level writes and are only touched by the loader — changing
/// direction mid-segment is forbidden.
pub trait StepPins {
    /// Emit one step pulse on the given motor channel.
    fn pulse_step(&mut self, motor: usize);

    /// Set the direction pin. `reverse == false` is the forward sense
    /// after polarity correction.
    fn write_dir(&mut self, motor: usize, reverse: bool);

    /// Drive the motor enable pin.
    fn write_enable(&mut self, motor: usize, enabled: bool);
}

/// Optional position feedback. Readings time-align with the runtime's
/// `commanded_steps` pipeline; when no encoder hardware exists the caller
/// substitutes commanded steps, making the following error read zero.
pub trait Encoders {
    /// Current encoder position of the given motor, in steps.
    fn read_encoder(&mut self, motor: usize) -> f64;
}
