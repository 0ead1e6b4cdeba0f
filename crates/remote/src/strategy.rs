//! Transport strategies.
//!
//! Remote hosts run a wide range of SSH server versions, and a single fixed
//! algorithm preference list makes older or hardened servers fail the
//! handshake. A [`TransportStrategy`] is one named set of method preferences;
//! the pool tries them in order and remembers which one worked per host.

use tailpost_core::config::{RemoteConfig, StrategyConfig};

/// One named set of transport method preferences.
///
/// `None` leaves the library default in place for that method class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStrategy {
    pub name: String,
    pub kex: Option<String>,
    pub host_key: Option<String>,
    pub ciphers: Option<String>,
    pub macs: Option<String>,
}

impl TransportStrategy {
    /// A strategy that keeps every library default.
    pub fn library_default(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kex: None,
            host_key: None,
            ciphers: None,
            macs: None,
        }
    }
}

impl From<&StrategyConfig> for TransportStrategy {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            name: config.name.clone(),
            kex: config.kex.clone(),
            host_key: config.host_key.clone(),
            ciphers: config.ciphers.clone(),
            macs: config.macs.clone(),
        }
    }
}

/// Builds the ordered strategy list from configuration.
pub fn strategies_from_config(config: &RemoteConfig) -> Vec<TransportStrategy> {
    config.strategies.iter().map(TransportStrategy::from).collect()
}

/// Returns strategy indices in attempt order, with `preferred` moved to the front.
pub fn attempt_order(len: usize, preferred: Option<usize>) -> Vec<usize> {
    match preferred {
        Some(first) if first < len => std::iter::once(first)
            .chain((0..len).filter(|&i| i != first))
            .collect(),
        _ => (0..len).collect(),
    }
}
