//! Daemon health reporting.
//!
//! The daemon status is the ingest pipeline's own health plus per-source
//! detail. [`HealthReporter`] logs only when the overall status changes,
//! so a steady daemon stays quiet.

use serde::Serialize;

use tailpost_core::pipeline::HealthStatus;
use tailpost_log_pipeline::SourceStatus;

/// Aggregated health report for the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall status as reported by the ingest pipeline.
    pub status: HealthStatus,
    /// Pipeline lifecycle state (`initialized`, `running`, `stopped`).
    pub state: String,
    /// Seconds since the orchestrator was built.
    pub uptime_secs: u64,
    /// Notifications waiting in delivery queues.
    pub pending_notifications: usize,
    /// Per-source status, sorted by key.
    pub sources: Vec<SourceStatus>,
}

impl DaemonHealth {
    /// Sources that cannot make progress until an operator acts.
    pub fn blocked_sources(&self) -> impl Iterator<Item = &SourceStatus> {
        self.sources
            .iter()
            .filter(|s| s.auth_failed || !s.admin_enabled)
    }
}

/// Logs health transitions.
#[derive(Debug, Default)]
pub struct HealthReporter {
    last: Option<HealthStatus>,
}

impl HealthReporter {
    /// Create a reporter with no previous observation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a health report. Returns `true` when the status changed.
    pub fn observe(&mut self, health: &DaemonHealth) -> bool {
        if self.last.as_ref() == Some(&health.status) {
            return false;
        }

        match &health.status {
            HealthStatus::Healthy => {
                tracing::info!(sources = health.sources.len(), "daemon healthy");
            }
            HealthStatus::Degraded(reason) => {
                let blocked: Vec<String> =
                    health.blocked_sources().map(|s| s.key.to_string()).collect();
                tracing::warn!(
                    reason = %reason,
                    blocked = ?blocked,
                    pending = health.pending_notifications,
                    "daemon degraded"
                );
            }
            HealthStatus::Unhealthy(reason) => {
                tracing::error!(reason = %reason, "daemon unhealthy");
            }
        }
        self.last = Some(health.status.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: HealthStatus) -> DaemonHealth {
        DaemonHealth {
            status,
            state: "running".to_owned(),
            uptime_secs: 1,
            pending_notifications: 0,
            sources: Vec::new(),
        }
    }

    #[test]
    fn reporter_logs_only_transitions() {
        let mut reporter = HealthReporter::new();
        assert!(reporter.observe(&report(HealthStatus::Healthy)));
        assert!(!reporter.observe(&report(HealthStatus::Healthy)));
        assert!(reporter.observe(&report(HealthStatus::Degraded("backlog".to_owned()))));
        assert!(!reporter.observe(&report(HealthStatus::Degraded("backlog".to_owned()))));
        assert!(reporter.observe(&report(HealthStatus::Degraded("auth".to_owned()))));
        assert!(reporter.observe(&report(HealthStatus::Healthy)));
    }

    #[test]
    fn health_serializes_for_status_output() {
        let json = serde_json::to_value(report(HealthStatus::Unhealthy("stopped".to_owned())))
            .unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["status"]["Unhealthy"], "stopped");
    }
}
