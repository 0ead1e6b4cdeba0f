//! Daemon orchestration -- assembly and process lifecycle.
//!
//! The [`Orchestrator`] turns a `TailpostConfig` into a running ingest
//! pipeline: it picks the state store backend and notification sink,
//! wires the source provider and operator hooks, then runs until SIGINT
//! or SIGTERM.
//!
//! # Shutdown order
//!
//! 1. Cancel source tasks and wait up to `scheduler.shutdown_grace_secs`
//! 2. Flush delivery queues within `delivery.flush_deadline_secs`
//! 3. Close pooled remote sessions
//! 4. Remove the PID file

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::time::MissedTickBehavior;

use tailpost_core::collab::{LoggingAdminHooks, SourceProvider, StaticSourceProvider};
use tailpost_core::config::TailpostConfig;
use tailpost_core::metrics as m;
use tailpost_core::pipeline::Pipeline;
use tailpost_core::store::{JsonFileStore, MemoryStore, StateStore};
use tailpost_log_pipeline::{
    IngestControls, IngestPipeline, IngestPipelineBuilder, LogSink, NotificationSink,
    PipelineConfig, WebhookSink,
};
use tailpost_remote::SshConnector;

use crate::health::{DaemonHealth, HealthReporter};
use crate::metrics_server;
use crate::pid;

/// Seconds between health evaluations in the main loop.
const HEALTH_INTERVAL_SECS: u64 = 30;

/// The daemon orchestrator.
pub struct Orchestrator {
    config: TailpostConfig,
    pipeline: IngestPipeline<SshConnector>,
    start_time: Instant,
    pid_written: bool,
}

impl Orchestrator {
    /// Load `tailpost.toml` and build the orchestrator.
    ///
    /// Sources are re-read from the same file on every refresh.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = TailpostConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        let provider = Arc::new(crate::sources::ConfigFileSourceProvider::new(
            PathBuf::from(config_path),
        ));
        Self::build_with_provider(config, provider).await
    }

    /// Build from an already-loaded configuration with a fixed source list.
    pub async fn build_from_config(config: TailpostConfig) -> Result<Self> {
        let provider = Arc::new(StaticSourceProvider::new(config.sources.clone()));
        Self::build_with_provider(config, provider).await
    }

    /// Build from a configuration and an explicit source provider.
    ///
    /// # Errors
    ///
    /// - configuration validation fails
    /// - the file store cannot be opened
    /// - a webhook URL is invalid
    /// - metrics are enabled and the recorder cannot be installed
    pub async fn build_with_provider(
        config: TailpostConfig,
        provider: Arc<dyn SourceProvider>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION"))
                .set(1.0);
        }

        let store = open_store(&config).await?;
        let sink = build_sink(&config)?;

        let pipeline = IngestPipelineBuilder::new(Arc::new(SshConnector::new()))
            .config(PipelineConfig::from_core(&config))
            .store(store)
            .sink(sink)
            .source_provider(provider)
            .admin_hooks(Arc::new(LoggingAdminHooks))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build ingest pipeline: {}", e))?;

        tracing::info!(
            store = %config.store.backend,
            destinations = config.sink.webhooks.len(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            pipeline,
            start_time: Instant::now(),
            pid_written: false,
        })
    }

    /// Write the PID file and start the ingest pipeline.
    pub async fn start(&mut self) -> Result<()> {
        if !self.config.general.pid_file.is_empty() {
            pid::write_pid_file(Path::new(&self.config.general.pid_file))?;
            self.pid_written = true;
        }

        if let Err(e) = self.pipeline.start().await {
            self.remove_pid();
            return Err(anyhow::anyhow!("failed to start ingest pipeline: {}", e));
        }
        let sources = self.pipeline.source_count().await;
        tracing::info!(sources, "tailpost-daemon running");
        Ok(())
    }

    /// Start, wait for SIGINT/SIGTERM, then shut down.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut reporter = HealthReporter::new();
        let mut ticker = tokio::time::interval(Duration::from_secs(HEALTH_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let signal = wait_for_shutdown_signal();
        tokio::pin!(signal);

        let received = loop {
            tokio::select! {
                received = &mut signal => break received?,
                _ = ticker.tick() => {
                    let health = self.health().await;
                    reporter.observe(&health);
                }
            }
        };
        tracing::info!(signal = received, "shutdown signal received");

        self.shutdown().await
    }

    /// Stop the pipeline (flushing notifications) and remove the PID file.
    pub async fn shutdown(&mut self) -> Result<()> {
        let result = self
            .pipeline
            .stop()
            .await
            .map_err(|e| anyhow::anyhow!("failed to stop ingest pipeline: {}", e));
        self.remove_pid();
        tracing::info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "tailpost-daemon shut down"
        );
        result
    }

    /// Current aggregated health.
    pub async fn health(&self) -> DaemonHealth {
        let uptime_secs = self.start_time.elapsed().as_secs();
        if self.config.metrics.enabled {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status: self.pipeline.health_check().await,
            state: self.pipeline.state_name().to_owned(),
            uptime_secs,
            pending_notifications: self.pipeline.batcher().pending().await,
            sources: self.pipeline.controls().all_statuses().await,
        }
    }

    /// Operational controls for the running pipeline.
    pub fn controls(&self) -> IngestControls {
        self.pipeline.controls()
    }

    /// The loaded configuration.
    pub fn config(&self) -> &TailpostConfig {
        &self.config
    }

    fn remove_pid(&mut self) {
        if self.pid_written {
            pid::remove_pid_file(Path::new(&self.config.general.pid_file));
            self.pid_written = false;
        }
    }
}

/// Open the configured state store backend.
pub async fn open_store(config: &TailpostConfig) -> Result<Arc<dyn StateStore>> {
    match config.store.backend.as_str() {
        "memory" => {
            tracing::warn!("using in-memory state store; cursors and sessions are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        "file" => {
            let path = config.store_path();
            let store = JsonFileStore::open(&path).await.map_err(|e| {
                anyhow::anyhow!("failed to open state store {}: {}", path.display(), e)
            })?;
            tracing::info!(path = %path.display(), "state store opened");
            Ok(Arc::new(store))
        }
        other => Err(anyhow::anyhow!("unknown store backend '{}'", other)),
    }
}

/// Build the notification sink. Without webhooks, notifications are only logged.
pub fn build_sink(config: &TailpostConfig) -> Result<Arc<dyn NotificationSink>> {
    if config.sink.webhooks.is_empty() {
        tracing::warn!("no webhooks configured; notifications will only be logged");
        return Ok(Arc::new(LogSink));
    }
    let sink = WebhookSink::from_config(&config.sink)
        .map_err(|e| anyhow::anyhow!("failed to build webhook sink: {}", e))?;
    Ok(Arc::new(sink))
}

/// Wait for SIGTERM or SIGINT and return the signal name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
