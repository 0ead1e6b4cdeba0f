//! CLI argument definitions for tailpost-daemon.

use std::path::PathBuf;

use clap::Parser;

use tailpost_core::config::TailpostConfig;

/// Tailpost remote log ingestion daemon.
///
/// Tails game-server logs over SSH/SFTP, tracks player sessions and
/// delivers rate-limited notifications to webhook destinations.
#[derive(Parser, Debug)]
#[command(name = "tailpost-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to tailpost.toml configuration file.
    #[arg(short, long, default_value = "/etc/tailpost/tailpost.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path. An empty value disables the PID file.
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply command-line overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut TailpostConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
    }
}
