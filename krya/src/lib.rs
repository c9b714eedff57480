//! Generate, run and retry desktop-automation scripts.
//!
//! A prompt goes to a hosted language model, the returned Python script is
//! written to disk and launched, and the captured output is classified. Failed
//! attempts feed their result text back into the next generation call until
//! the attempt budget runs out or someone stops the job.
//!
//! - **[`core`]**: Pure, deterministic logic (status transitions, classifier,
//!   result text, code cleaning, budgets, cooldown). No I/O.
//! - **[`io`]**: Side-effecting operations (config, model client, script
//!   writer, process launcher, lock marker, job store).
//!
//! [`coordinator`] ties both together; [`project`] wires a project directory
//! into a ready coordinator for the CLI and the HTTP server.

pub mod coordinator;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod job_log;
pub mod logging;
pub mod project;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
