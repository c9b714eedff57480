//! Side-effecting operations: config, filesystem, processes, network.

pub mod config;
pub mod executor;
pub mod generator;
pub mod init;
pub mod job_store;
pub mod lock;
pub mod process;
pub mod prompt;
pub mod script;
