//! File-backed source provider.
//!
//! Re-reads `[[sources]]` from the configuration file on every refresh so
//! edits take effect without a restart. Other sections are not reloaded.

use std::path::{Path, PathBuf};

use tailpost_core::collab::SourceProvider;
use tailpost_core::config::TailpostConfig;
use tailpost_core::error::PipelineError;
use tailpost_core::pipeline::BoxFuture;
use tailpost_core::types::SourceConfig;

/// Source provider backed by `tailpost.toml`.
#[derive(Debug, Clone)]
pub struct ConfigFileSourceProvider {
    path: PathBuf,
}

impl ConfigFileSourceProvider {
    /// Create a provider reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Configuration file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<SourceConfig>, PipelineError> {
        // a broken edit keeps the previous list: the pipeline ignores failed refreshes
        let config = TailpostConfig::load(&self.path).await.map_err(|e| {
            PipelineError::SourceProvider(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(config.sources)
    }
}

impl SourceProvider for ConfigFileSourceProvider {
    fn list_sources(&self) -> BoxFuture<'_, Result<Vec<SourceConfig>, PipelineError>> {
        Box::pin(self.load())
    }
}
