//! Deterministic, pure logic shared by the automation core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and take clocks as arguments, so every decision is testable in
//! isolation.

pub mod budget;
pub mod classifier;
pub mod cleaning;
pub mod cooldown;
pub mod log_window;
pub mod report;
pub mod status;
pub mod types;
