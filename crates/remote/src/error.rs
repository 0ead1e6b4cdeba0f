//! 원격 접속 에러 타입
//!
//! [`RemoteError`]는 세션 풀, 커넥터, 테일러에서 발생하는 모든 에러를 표현합니다.
//! 호출자는 [`is_auth`](RemoteError::is_auth)/[`is_transport`](RemoteError::is_transport)로
//! 재시도 여부를 결정합니다.

use std::time::Duration;

use tailpost_core::error::TailpostError;

/// 원격 접속 도메인 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// TCP 연결 실패
    #[error("connect to {host} failed: {reason}")]
    Connect {
        /// 대상 호스트
        host: String,
        /// 실패 사유
        reason: String,
    },

    /// 작업 시간 초과
    #[error("remote operation '{operation}' timed out after {after:?}")]
    Timeout {
        /// 작업 이름
        operation: &'static str,
        /// 적용된 타임아웃
        after: Duration,
    },

    /// 전송 파라미터 협상 실패
    #[error("negotiation with {host} failed using strategy '{strategy}': {reason}")]
    Negotiation {
        /// 대상 호스트
        host: String,
        /// 사용한 전략 이름
        strategy: String,
        /// 실패 사유
        reason: String,
    },

    /// 인증 거부 (재시도하지 않음)
    #[error("authentication rejected by {host} for user '{username}': {reason}")]
    Auth {
        /// 대상 호스트
        host: String,
        /// 사용자명
        username: String,
        /// 거부 사유
        reason: String,
    },

    /// 세션 확립 후 프로토콜/SFTP 에러
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 원격 경로 없음
    #[error("remote path not found: {0}")]
    NotFound(String),

    /// 모든 전략 실패
    #[error("all transport strategies failed for {host}: {}", attempts.join("; "))]
    AllStrategiesFailed {
        /// 대상 호스트
        host: String,
        /// 전략별 실패 사유
        attempts: Vec<String>,
    },

    /// 작업자 풀 에러 (종료됨, 패닉 등)
    #[error("worker pool error: {0}")]
    WorkerPool(String),

    /// 세션이 이미 손상되어 사용할 수 없음
    #[error("lease for {0} lost its session after a failed operation")]
    Poisoned(String),

    /// 로컬 I/O 에러
    #[error("io error: {0}")]
    Io(String),
}

impl RemoteError {
    /// 인증 실패인지 확인합니다. 인증 실패는 소스 단위로 치명적입니다.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// 전송 계층 실패인지 확인합니다. 다음 사이클에 재시도합니다.
    pub fn is_transport(&self) -> bool {
        !self.is_auth()
    }

    /// 시간 초과인지 확인합니다.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 세션을 더 이상 재사용하면 안 되는 에러인지 확인합니다.
    ///
    /// 경로 없음은 세션 자체는 정상이므로 제외합니다.
    pub fn requires_eviction(&self) -> bool {
        !matches!(self, Self::NotFound(_))
    }
}

impl From<RemoteError> for TailpostError {
    fn from(err: RemoteError) -> Self {
        TailpostError::Remote(err.to_string())
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Io(err.to_string())
    }
}
