//! # Pipeline Simulation
//!
//! Composes the motion planner and the step generator into a complete
//! pipeline against a simulated board, driven by a deterministic
//! interrupt pump. Used for end-to-end validation and for replaying
//! move scripts from the `simrun` binary.

pub mod board;
pub mod config;
pub mod machine;

pub use board::{PulseEvent, SimBoard};
pub use config::IniSettings;
pub use machine::{Machine, TracingReporter};
