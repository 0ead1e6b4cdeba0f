//! Remote transport abstraction for testability.
//!
//! [`RemoteConnector`] opens sessions and [`RemoteSession`] performs file
//! operations on them. Production code uses [`SshConnector`](crate::ssh::SshConnector);
//! tests use `MockConnector` over an in-memory file tree.
//!
//! ```text
//! SessionPool ──► RemoteConnector (trait) ──► SshConnector ──► libssh2 / SFTP
//!                                         └─► MockConnector (tests)
//! ```
//!
//! Every method here is **blocking**. Callers never invoke them on the async
//! runtime directly; they go through [`WorkerPool::run`](crate::worker::WorkerPool::run).

use std::time::Duration;

use bytes::Bytes;
use tailpost_core::types::SourceCredentials;

use crate::error::RemoteError;
use crate::strategy::TransportStrategy;

/// Size and modification time of a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFileStat {
    pub size: u64,
    /// Seconds since the Unix epoch, `0` when the server does not report it.
    pub mtime: u64,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    /// Full remote path.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub stat: RemoteFileStat,
    pub is_file: bool,
}

/// An open, authenticated session capable of reading remote files.
///
/// Implementations are moved between worker threads, so they must be `Send`.
/// They are never shared: a session belongs to exactly one lease at a time.
pub trait RemoteSession: Send + 'static {
    /// Stats a remote file.
    ///
    /// # Errors
    ///
    /// - `RemoteError::NotFound` if the path does not exist
    /// - `RemoteError::Protocol` for any other SFTP failure
    fn stat(&mut self, path: &str) -> Result<RemoteFileStat, RemoteError>;

    /// Reads at most `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes than requested only at end of file.
    fn read_at(&mut self, path: &str, offset: u64, len: u64) -> Result<Bytes, RemoteError>;

    /// Lists the entries of a remote directory.
    fn list_dir(&mut self, dir: &str) -> Result<Vec<RemoteDirEntry>, RemoteError>;

    /// Closes the session. Errors are swallowed; the session is unusable afterwards.
    fn close(&mut self);
}

/// Opens [`RemoteSession`]s.
///
/// The trait is `Send + Sync + 'static` so one connector can be shared by the
/// pool across every worker thread.
pub trait RemoteConnector: Send + Sync + 'static {
    type Session: RemoteSession;

    /// Connects, negotiates with `strategy` and authenticates.
    ///
    /// `timeout` bounds the TCP connect and every subsequent protocol round trip.
    ///
    /// # Errors
    ///
    /// - `RemoteError::Auth` when the credentials are rejected
    /// - `RemoteError::Negotiation` when the handshake fails under this strategy
    /// - `RemoteError::Timeout` / `RemoteError::Connect` for network failures
    fn connect(
        &self,
        credentials: &SourceCredentials,
        strategy: &TransportStrategy,
        timeout: Duration,
    ) -> Result<Self::Session, RemoteError>;
}
