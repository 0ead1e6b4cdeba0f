use anyhow::Result;
use clap::Parser;

use tailpost_core::config::TailpostConfig;
use tailpost_daemon::cli::DaemonCli;
use tailpost_daemon::logging;
use tailpost_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = TailpostConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!(
            "configuration OK: {} ({} sources)",
            cli.config.display(),
            config.sources.len()
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "tailpost-daemon starting"
    );

    let provider = std::sync::Arc::new(tailpost_daemon::sources::ConfigFileSourceProvider::new(
        cli.config.clone(),
    ));
    let mut orchestrator = Orchestrator::build_with_provider(config, provider).await?;
    orchestrator.run().await
}
