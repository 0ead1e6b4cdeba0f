//! 에러 타입 -- 도메인별 에러 정의

use std::time::Duration;

/// Tailpost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum TailpostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 영속 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 원격 접속/읽기 에러
    #[error("remote error: {0}")]
    Remote(String),

    /// 수집 파이프라인 에러
    #[error("ingest error: {0}")]
    Ingest(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,

    /// 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 소스 목록 조회 실패
    #[error("source provider failed: {0}")]
    SourceProvider(String),
}

/// 영속 저장소 에러
///
/// 타임아웃은 성공이 아닌 실패로 취급합니다. 호출한 사이클은 커서를
/// 전진시키지 않고 중단됩니다.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// 저장소 호출 시간 초과
    #[error("store operation '{operation}' timed out after {after:?}")]
    Timeout {
        /// 호출한 연산 이름
        operation: &'static str,
        /// 적용된 타임아웃
        after: Duration,
    },

    /// 저장소 백엔드 실패
    #[error("store backend failure: {0}")]
    Backend(String),

    /// 직렬화/역직렬화 실패
    #[error("store serialization failure: {0}")]
    Serialization(String),
}

impl StoreError {
    /// 타임아웃 에러인지 확인합니다.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_timeout_display_names_operation() {
        let err = StoreError::Timeout {
            operation: "get_cursor",
            after: Duration::from_secs(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("get_cursor"));
        assert!(msg.contains("3s"));
        assert!(err.is_timeout());
    }

    #[test]
    fn store_error_converts_to_top_level() {
        let err: TailpostError = StoreError::Backend("disk full".to_owned()).into();
        assert!(matches!(err, TailpostError::Store(StoreError::Backend(_))));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "delivery.per_minute_cap".to_owned(),
            reason: "must be greater than 0".to_owned(),
        };
        assert!(err.to_string().contains("delivery.per_minute_cap"));
    }
}
