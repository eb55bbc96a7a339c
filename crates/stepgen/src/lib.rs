//! # Step Pulse Generation
//!
//! The back half of the motion pipeline: everything downstream of the
//! segment executor. The planner hands fully-computed segments (per-motor
//! step counts plus timing) into a single-slot [`PrepSlot`]; the
//! [`loader`](loader::load_move) installs a prepared segment into the
//! [`StepperRuntime`]; and the DDA tick routine emits step pulses by
//! fractional accumulation until the segment's tick budget is exhausted.
//!
//! ## Execution model
//!
//! On hardware these three stages run at distinct interrupt priorities
//! (DDA timer highest, loader in the middle, exec below). Here each stage
//! is a plain function that *returns* what the interrupt controller would
//! have been asked to do next ([`DdaEvent`], [`LoadOutcome`]), so a host
//! pump — or a real ISR shim — can sequence them deterministically.
//!
//! ## Synchronization
//!
//! The prep slot is the only state shared between the exec and load
//! stages. Its `owner` flag is the sole synchronization primitive: the
//! writer publishes with release ordering and the reader observes with
//! acquire ordering, so the slot contents are fully visible before
//! ownership changes hands. Everything inside the DDA tick is integer
//! arithmetic; no float touches the highest-priority path.

pub mod dda;
pub mod hal;
pub mod loader;
pub mod motor;
pub mod prep;

pub use dda::{DdaEvent, StepperRuntime};
pub use hal::{Encoders, StepPins};
pub use loader::{load_move, LoadOutcome};
pub use motor::{MotorConfig, MotorSettings, PowerMode};
pub use prep::{PrepError, PrepMove, PrepOwner, PrepSlot};

/// Number of physical motor channels.
pub const MOTORS: usize = 6;

/// DDA timer frequency in Hz. The product of this and [`DDA_SUBSTEPS`]
/// must accommodate the fastest expected pulse rate with headroom.
pub const FREQUENCY_DDA: f64 = 50_000.0;

/// Dwell timer frequency in Hz.
pub const FREQUENCY_DWELL: f64 = 10_000.0;

/// Substep scaling factor. Lets the DDA carry fractional steps as
/// integers; one emitted pulse corresponds to this many substeps.
pub const DDA_SUBSTEPS: f64 = 100_000.0;

/// Convert a timer frequency to its period in seconds.
pub fn frequency_to_period(freq: f64) -> f64 {
    1.0 / freq
}
