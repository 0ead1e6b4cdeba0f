//! Tailpost 원격 접근 계층
//!
//! 원격 게임 서버 호스트에 SSH/SFTP로 접속해 로그 파일을 증분으로 읽습니다.
//!
//! # 모듈 구성
//!
//! - [`connector`]: 커넥터/세션 trait (블로킹 인터페이스)
//! - [`ssh`]: libssh2 기반 프로덕션 커넥터
//! - [`strategy`]: 전송 파라미터 전략과 시도 순서
//! - [`worker`]: 크기 제한 블로킹 작업자 풀 (유일한 블로킹 진입점)
//! - [`pool`]: 소스별 세션 풀과 임대
//! - [`tailer`]: 콜드/핫 스타트 증분 테일러
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! async task ──► SessionPool::acquire ──► WorkerPool::run ──► RemoteConnector::connect
//!      │                                        ▲
//!      └──► Tailer::read_new(lease) ────────────┘  (stat + head + read in one job)
//! ```

pub mod connector;
pub mod error;
pub mod pool;
pub mod ssh;
pub mod strategy;
pub mod tailer;
pub mod worker;

// --- 주요 타입 re-export ---

pub use connector::{RemoteConnector, RemoteDirEntry, RemoteFileStat, RemoteSession};
pub use error::RemoteError;
pub use pool::{ConnectionLease, PoolSettings, SessionPool};
pub use ssh::{SshConnector, SshSession};
pub use strategy::TransportStrategy;
pub use tailer::{ColdStartReason, TailOutcome, TailRequest, TailSettings, Tailer};
pub use worker::WorkerPool;
