//! 수집 파이프라인 에러 타입
//!
//! [`IngestError`]는 추출, 세션 상태, 전달, 사이클 실행 중 발생하는 모든 에러를
//! 표현합니다. `From<IngestError> for TailpostError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use tailpost_core::error::{ConfigError, PipelineError, StoreError, TailpostError};
use tailpost_remote::RemoteError;

use crate::sink::SinkError;

/// 수집 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 원격 접속/읽기 실패
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// 저장소 호출 실패 (타임아웃 포함)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 규칙 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 규칙 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 규칙 유효성 검증 실패
    #[error("rule validation error: rule '{rule_id}': {reason}")]
    RuleValidation {
        /// 문제가 된 규칙 ID
        rule_id: String,
        /// 실패 사유
        reason: String,
    },

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// 알림 싱크 에러
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 등록되지 않은 소스
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// 사이클 도중 소스가 비활성화됨
    #[error("source disabled: {0}")]
    SourceDisabled(String),

    /// 파이프라인 종료로 취소됨
    #[error("cancelled")]
    Cancelled,

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

impl IngestError {
    /// 인증 실패인지 확인합니다.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_auth())
    }

    /// 비활성화/취소로 중단되었는지 확인합니다.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::SourceDisabled(_) | Self::Cancelled)
    }
}

impl From<ConfigError> for IngestError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidValue { field, reason } => Self::Config { field, reason },
            other => Self::Config {
                field: "config".to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<IngestError> for TailpostError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Store(e) => TailpostError::Store(e),
            IngestError::Remote(e) => TailpostError::Remote(e.to_string()),
            IngestError::Pipeline(e) => TailpostError::Pipeline(e),
            other => TailpostError::Ingest(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rule_validation_display() {
        let err = IngestError::RuleValidation {
            rule_id: "bounty".to_owned(),
            reason: "pattern must not be empty".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bounty"));
        assert!(msg.contains("pattern must not be empty"));
    }

    #[test]
    fn auth_classification_passes_through() {
        let err: IngestError = RemoteError::Auth {
            host: "10.0.0.5".to_owned(),
            username: "logs".to_owned(),
            reason: "denied".to_owned(),
        }
        .into();
        assert!(err.is_auth());
        assert!(!err.is_abort());

        let err: IngestError = RemoteError::Protocol("eof".to_owned()).into();
        assert!(!err.is_auth());
    }

    #[test]
    fn store_error_keeps_its_variant_at_top_level() {
        let err: IngestError = StoreError::Timeout {
            operation: "put_cursor",
            after: Duration::from_secs(2),
        }
        .into();
        let top: TailpostError = err.into();
        assert!(matches!(top, TailpostError::Store(StoreError::Timeout { .. })));
    }

    #[test]
    fn config_error_maps_field() {
        let err: IngestError = ConfigError::InvalidValue {
            field: "sources.t/s.password".to_owned(),
            reason: "missing".to_owned(),
        }
        .into();
        assert!(matches!(err, IngestError::Config { ref field, .. } if field == "sources.t/s.password"));
    }

    #[test]
    fn other_errors_become_ingest() {
        let top: TailpostError = IngestError::UnknownSource("t/s".to_owned()).into();
        assert!(matches!(top, TailpostError::Ingest(ref msg) if msg.contains("t/s")));
    }
}
