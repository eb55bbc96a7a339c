//! The segment loader: prep slot → run slot.
//!
//! Runs at a priority between exec and the DDA. Invoked when the DDA
//! exhausts a segment (or at start-up), it installs the staged payload
//! into the stepper runtime, writes direction pins, and returns the slot
//! to the exec stage so the next segment can be prepared while this one
//! runs.

use tracing::trace;

use crate::dda::StepperRuntime;
use crate::hal::StepPins;
use crate::motor::{MotorConfig, PowerMode};
use crate::prep::{PrepMove, PrepOwner, PrepSlot};
use crate::MOTORS;

/// What the load pass did, and therefore what the interrupt controller
/// should be asked to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The slot was not ready (still owned by exec). The caller should
    /// request an exec pass.
    NoWork,
    /// A line segment was installed and the DDA timer started.
    Started,
    /// A dwell was installed on the dwell timer.
    DwellStarted,
    /// A queued command reached the front; the caller must execute it
    /// synchronously against the named planner buffer, then request exec.
    RunCommand(u8),
    /// A null payload was consumed; nothing is running.
    Null,
}

/// Transfer the prepared payload into the run slot.
///
/// Must only be called when the stepper runtime is idle. Direction pins
/// are written here and never from the DDA — changing direction
/// mid-segment is forbidden.
pub fn load_move(
    prep: &mut PrepSlot,
    run: &mut StepperRuntime,
    pins: &mut impl StepPins,
    config: &MotorConfig,
) -> LoadOutcome {
    if prep.owner() != PrepOwner::Loader {
        // Nothing staged. The DDA stays disabled; ask for an exec.
        return LoadOutcome::NoWork;
    }

    let outcome = match prep.move_type {
        PrepMove::Aline => {
            let mut steps = [0i64; MOTORS];
            for (m, motor) in prep.motors.iter().enumerate() {
                steps[m] = motor.steps;
                if motor.steps != 0 {
                    pins.write_dir(m, motor.dir);
                    if config.motors[m].power_mode != PowerMode::Disabled {
                        pins.write_enable(m, true);
                    }
                }
            }
            run.start_segment(
                &steps,
                prep.timer_ticks,
                prep.timer_ticks_x_substeps,
                prep.counter_reset,
            );
            trace!(
                ticks = prep.timer_ticks,
                counter_reset = prep.counter_reset,
                "segment loaded"
            );
            LoadOutcome::Started
        }
        PrepMove::Dwell => {
            run.start_dwell(prep.timer_ticks);
            trace!(ticks = prep.timer_ticks, "dwell loaded");
            LoadOutcome::DwellStarted
        }
        PrepMove::Command => LoadOutcome::RunCommand(prep.command_buffer),
        PrepMove::Null => LoadOutcome::Null,
    };

    // Flip the slot back so exec can stage the next payload immediately,
    // while this one runs.
    prep.hand_to_exec();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingPins {
        dirs: [Option<bool>; MOTORS],
        enables: [Option<bool>; MOTORS],
    }

    impl StepPins for RecordingPins {
        fn pulse_step(&mut self, _motor: usize) {}
        fn write_dir(&mut self, motor: usize, reverse: bool) {
            self.dirs[motor] = Some(reverse);
        }
        fn write_enable(&mut self, motor: usize, enabled: bool) {
            self.enables[motor] = Some(enabled);
        }
    }

    const SEGMENT_MIN: f64 = 1.5 / 60_000.0;

    #[test]
    fn unowned_slot_is_no_work() {
        let mut prep = PrepSlot::new();
        let mut run = StepperRuntime::new();
        let mut pins = RecordingPins::default();
        let config = MotorConfig::new();

        assert_eq!(
            load_move(&mut prep, &mut run, &mut pins, &config),
            LoadOutcome::NoWork
        );
        assert!(!run.is_busy());
    }

    #[test]
    fn loads_segment_and_returns_slot_to_exec() {
        let mut prep = PrepSlot::new();
        let mut run = StepperRuntime::new();
        let mut pins = RecordingPins::default();
        let config = MotorConfig::new();

        let travel = [4.0, -2.0, 0.0, 0.0, 0.0, 0.0];
        prep.prep_line(&travel, &[0.0; MOTORS], SEGMENT_MIN, &config)
            .expect("prep should succeed");
        prep.hand_to_loader();

        assert_eq!(
            load_move(&mut prep, &mut run, &mut pins, &config),
            LoadOutcome::Started
        );
        assert!(run.dda_running());
        assert_eq!(prep.owner(), PrepOwner::Exec);
        assert_eq!(pins.dirs[0], Some(false));
        assert_eq!(pins.dirs[1], Some(true));
        assert_eq!(pins.enables[0], Some(true));
        // Motor 2 had zero steps: its direction must not be disturbed.
        assert_eq!(pins.dirs[2], None);
    }

    #[test]
    fn dwell_leaves_pins_untouched() {
        let mut prep = PrepSlot::new();
        let mut run = StepperRuntime::new();
        let mut pins = RecordingPins::default();
        let config = MotorConfig::new();

        prep.prep_dwell(0.5);
        prep.hand_to_loader();
        assert_eq!(
            load_move(&mut prep, &mut run, &mut pins, &config),
            LoadOutcome::DwellStarted
        );
        assert!(run.dwell_running());
        assert_eq!(run.dwell_ticks_downcount, 5_000);
        assert!(pins.dirs.iter().all(Option::is_none));
    }

    #[test]
    fn command_payload_is_surfaced_to_caller() {
        let mut prep = PrepSlot::new();
        let mut run = StepperRuntime::new();
        let mut pins = RecordingPins::default();
        let config = MotorConfig::new();

        prep.prep_command(7);
        prep.hand_to_loader();
        assert_eq!(
            load_move(&mut prep, &mut run, &mut pins, &config),
            LoadOutcome::RunCommand(7)
        );
        assert!(!run.is_busy());
        assert_eq!(prep.owner(), PrepOwner::Exec);
    }
}
