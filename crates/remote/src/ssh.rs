//! SSH/SFTP connector backed by libssh2.
//!
//! [`SshConnector`] applies a [`TransportStrategy`]'s method preferences before
//! the handshake, so the same host can be retried with a different algorithm
//! set. libssh2 error codes are mapped onto [`RemoteError`] so the pool can tell
//! an authentication rejection (fatal) from a negotiation failure (try the next
//! strategy).

use std::io::{Read, Seek, SeekFrom};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use ssh2::{ErrorCode, MethodType, Session, Sftp};
use tailpost_core::types::{SourceAuth, SourceCredentials};
use tracing::debug;

use crate::connector::{RemoteConnector, RemoteDirEntry, RemoteFileStat, RemoteSession};
use crate::error::RemoteError;
use crate::strategy::TransportStrategy;

// libssh2 session error codes
const ERROR_KEX_FAILURE: i32 = -5;
const ERROR_KEY_EXCHANGE_FAILURE: i32 = -8;
const ERROR_TIMEOUT: i32 = -9;
const ERROR_PASSWORD_EXPIRED: i32 = -15;
const ERROR_METHOD_NONE: i32 = -17;
const ERROR_AUTHENTICATION_FAILED: i32 = -18;
const ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;
const ERROR_METHOD_NOT_SUPPORTED: i32 = -33;

// SFTP status codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

/// Upper bound on a single preallocated read buffer.
const MAX_PREALLOC: u64 = 1024 * 1024;

/// Production connector over TCP + libssh2.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }
}

impl RemoteConnector for SshConnector {
    type Session = SshSession;

    fn connect(
        &self,
        credentials: &SourceCredentials,
        strategy: &TransportStrategy,
        timeout: Duration,
    ) -> Result<SshSession, RemoteError> {
        let host = format!("{}:{}", credentials.host, credentials.port);

        let addr = (credentials.host.as_str(), credentials.port)
            .to_socket_addrs()
            .map_err(|e| RemoteError::Connect {
                host: host.clone(),
                reason: format!("address resolution failed: {e}"),
            })?
            .next()
            .ok_or_else(|| RemoteError::Connect {
                host: host.clone(),
                reason: "host resolved to no addresses".to_owned(),
            })?;

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                RemoteError::Timeout {
                    operation: "connect",
                    after: timeout,
                }
            } else {
                RemoteError::Connect {
                    host: host.clone(),
                    reason: e.to_string(),
                }
            }
        })?;
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;

        let mut session =
            Session::new().map_err(|e| RemoteError::Protocol(format!("session init: {e}")))?;
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        apply_strategy(&session, strategy).map_err(|e| RemoteError::Negotiation {
            host: host.clone(),
            strategy: strategy.name.clone(),
            reason: format!("invalid method preference: {e}"),
        })?;

        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| classify_handshake(e.code(), &e.to_string(), &host, strategy, timeout))?;

        let auth_result = match &credentials.auth {
            SourceAuth::Password(password) => {
                session.userauth_password(&credentials.username, password)
            }
            SourceAuth::PrivateKey { path, passphrase } => session.userauth_pubkey_file(
                &credentials.username,
                None,
                Path::new(path),
                passphrase.as_deref(),
            ),
        };
        if let Err(e) = auth_result {
            return Err(classify_auth(
                e.code(),
                &e.to_string(),
                &host,
                &credentials.username,
                timeout,
            ));
        }
        if !session.authenticated() {
            return Err(RemoteError::Auth {
                host,
                username: credentials.username.clone(),
                reason: "server did not accept any authentication method".to_owned(),
            });
        }

        let sftp = session
            .sftp()
            .map_err(|e| RemoteError::Protocol(format!("sftp subsystem: {e}")))?;

        debug!(host = %host, strategy = %strategy.name, "ssh session established");
        Ok(SshSession {
            session,
            sftp,
            timeout,
        })
    }
}

fn apply_strategy(session: &Session, strategy: &TransportStrategy) -> Result<(), ssh2::Error> {
    if let Some(kex) = &strategy.kex {
        session.method_pref(MethodType::Kex, kex)?;
    }
    if let Some(host_key) = &strategy.host_key {
        session.method_pref(MethodType::HostKey, host_key)?;
    }
    if let Some(ciphers) = &strategy.ciphers {
        session.method_pref(MethodType::CryptCs, ciphers)?;
        session.method_pref(MethodType::CryptSc, ciphers)?;
    }
    if let Some(macs) = &strategy.macs {
        session.method_pref(MethodType::MacCs, macs)?;
        session.method_pref(MethodType::MacSc, macs)?;
    }
    Ok(())
}

fn classify_handshake(
    code: ErrorCode,
    message: &str,
    host: &str,
    strategy: &TransportStrategy,
    timeout: Duration,
) -> RemoteError {
    match code {
        ErrorCode::Session(ERROR_TIMEOUT) => RemoteError::Timeout {
            operation: "handshake",
            after: timeout,
        },
        ErrorCode::Session(
            ERROR_KEX_FAILURE
            | ERROR_KEY_EXCHANGE_FAILURE
            | ERROR_METHOD_NONE
            | ERROR_METHOD_NOT_SUPPORTED,
        ) => RemoteError::Negotiation {
            host: host.to_owned(),
            strategy: strategy.name.clone(),
            reason: message.to_owned(),
        },
        _ => RemoteError::Negotiation {
            host: host.to_owned(),
            strategy: strategy.name.clone(),
            reason: format!("handshake failed: {message}"),
        },
    }
}

fn classify_auth(
    code: ErrorCode,
    message: &str,
    host: &str,
    username: &str,
    timeout: Duration,
) -> RemoteError {
    match code {
        ErrorCode::Session(ERROR_TIMEOUT) => RemoteError::Timeout {
            operation: "authenticate",
            after: timeout,
        },
        ErrorCode::Session(
            ERROR_AUTHENTICATION_FAILED | ERROR_PUBLICKEY_UNVERIFIED | ERROR_PASSWORD_EXPIRED,
        ) => RemoteError::Auth {
            host: host.to_owned(),
            username: username.to_owned(),
            reason: message.to_owned(),
        },
        // key file unreadable, malformed, wrong passphrase: still the operator's credentials
        ErrorCode::Session(_) => RemoteError::Auth {
            host: host.to_owned(),
            username: username.to_owned(),
            reason: message.to_owned(),
        },
        ErrorCode::SFTP(_) => RemoteError::Protocol(message.to_owned()),
    }
}

fn classify_sftp(code: ErrorCode, message: &str, path: &str, timeout: Duration) -> RemoteError {
    match code {
        ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH) => RemoteError::NotFound(path.to_owned()),
        ErrorCode::Session(ERROR_TIMEOUT) => RemoteError::Timeout {
            operation: "sftp",
            after: timeout,
        },
        _ => RemoteError::Protocol(format!("{path}: {message}")),
    }
}

/// Authenticated SSH session with an open SFTP channel.
pub struct SshSession {
    session: Session,
    sftp: Sftp,
    timeout: Duration,
}

impl SshSession {
    fn sftp_err(&self, err: ssh2::Error, path: &str) -> RemoteError {
        classify_sftp(err.code(), &err.to_string(), path, self.timeout)
    }
}

impl RemoteSession for SshSession {
    fn stat(&mut self, path: &str) -> Result<RemoteFileStat, RemoteError> {
        let stat = self
            .sftp
            .stat(Path::new(path))
            .map_err(|e| self.sftp_err(e, path))?;
        Ok(RemoteFileStat {
            size: stat.size.unwrap_or(0),
            mtime: stat.mtime.unwrap_or(0),
        })
    }

    fn read_at(&mut self, path: &str, offset: u64, len: u64) -> Result<Bytes, RemoteError> {
        let mut file = self
            .sftp
            .open(Path::new(path))
            .map_err(|e| self.sftp_err(e, path))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| RemoteError::Protocol(format!("{path}: seek to {offset}: {e}")))?;

        let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC) as usize);
        file.take(len)
            .read_to_end(&mut buf)
            .map_err(|e| RemoteError::Protocol(format!("{path}: read: {e}")))?;
        Ok(Bytes::from(buf))
    }

    fn list_dir(&mut self, dir: &str) -> Result<Vec<RemoteDirEntry>, RemoteError> {
        let entries = self
            .sftp
            .readdir(Path::new(dir))
            .map_err(|e| self.sftp_err(e, dir))?;

        Ok(entries
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(RemoteDirEntry {
                    path: path.to_string_lossy().into_owned(),
                    name,
                    is_file: stat.is_file(),
                    stat: RemoteFileStat {
                        size: stat.size.unwrap_or(0),
                        mtime: stat.mtime.unwrap_or(0),
                    },
                })
            })
            .collect())
    }

    fn close(&mut self) {
        if let Err(e) = self.session.disconnect(None, "tailpost closing session", None) {
            debug!(error = %e, "ssh disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> TransportStrategy {
        TransportStrategy::library_default("modern")
    }

    #[test]
    fn handshake_timeout_is_timeout() {
        let err = classify_handshake(
            ErrorCode::Session(ERROR_TIMEOUT),
            "timed out",
            "h:22",
            &strategy(),
            Duration::from_secs(5),
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn kex_failure_is_negotiation() {
        let err = classify_handshake(
            ErrorCode::Session(ERROR_KEX_FAILURE),
            "no common kex",
            "h:22",
            &strategy(),
            Duration::from_secs(5),
        );
        assert!(matches!(err, RemoteError::Negotiation { ref strategy, .. } if strategy == "modern"));
        assert!(!err.is_auth());
    }

    #[test]
    fn rejected_password_is_auth() {
        let err = classify_auth(
            ErrorCode::Session(ERROR_AUTHENTICATION_FAILED),
            "Authentication failed",
            "h:22",
            "logs",
            Duration::from_secs(5),
        );
        assert!(err.is_auth());
    }

    #[test]
    fn auth_timeout_is_transport() {
        let err = classify_auth(
            ErrorCode::Session(ERROR_TIMEOUT),
            "timed out",
            "h:22",
            "logs",
            Duration::from_secs(5),
        );
        assert!(err.is_transport());
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = classify_sftp(
            ErrorCode::SFTP(FX_NO_SUCH_FILE),
            "no such file",
            "/logs/a.log",
            Duration::from_secs(5),
        );
        assert!(matches!(err, RemoteError::NotFound(ref p) if p == "/logs/a.log"));
    }

    #[test]
    fn unreachable_host_fails_fast() {
        // port 1 on localhost is closed on any sane test machine
        let creds = SourceCredentials {
            host: "127.0.0.1".to_owned(),
            port: 1,
            username: "logs".to_owned(),
            auth: SourceAuth::Password("x".to_owned()),
        };
        let err = SshConnector::new()
            .connect(&creds, &strategy(), Duration::from_secs(2))
            .err()
            .unwrap();
        assert!(err.is_transport());
    }
}
