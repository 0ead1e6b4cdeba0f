//! Tailpost daemon library.
//!
//! Exposes the daemon's building blocks for integration tests. In
//! production `tailpost-daemon` runs as a binary (main.rs).

pub mod cli;
pub mod health;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
pub mod pid;
pub mod sources;
