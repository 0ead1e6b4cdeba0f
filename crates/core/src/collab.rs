//! 외부 협력자 인터페이스
//!
//! 소스 목록 제공자와 운영자 알림 훅을 정의합니다. 구체 구현은 데몬이나
//! 외부 관리 시스템이 주입합니다.

use std::sync::RwLock;

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::pipeline::BoxFuture;
use crate::types::{SourceConfig, SourceKey};

/// 활성 소스 목록 제공자
///
/// 파이프라인은 `scheduler.source_refresh_secs`마다 호출하여 추가/변경/삭제된
/// 소스를 반영합니다. 실패하면 직전 목록을 유지합니다.
pub trait SourceProvider: Send + Sync {
    /// 현재 소스 목록을 반환합니다.
    fn list_sources(&self) -> BoxFuture<'_, Result<Vec<SourceConfig>, PipelineError>>;
}

/// 고정 소스 목록 제공자
///
/// 설정 파일의 `[[sources]]`를 그대로 제공합니다. [`replace`](Self::replace)로
/// 목록을 교체할 수 있습니다.
#[derive(Debug, Default)]
pub struct StaticSourceProvider {
    sources: RwLock<Vec<SourceConfig>>,
}

impl StaticSourceProvider {
    /// 소스 목록으로 생성합니다.
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self {
            sources: RwLock::new(sources),
        }
    }

    /// 목록 전체를 교체합니다.
    pub fn replace(&self, sources: Vec<SourceConfig>) {
        match self.sources.write() {
            Ok(mut guard) => *guard = sources,
            Err(poisoned) => *poisoned.into_inner() = sources,
        }
    }
}

impl SourceProvider for StaticSourceProvider {
    fn list_sources(&self) -> BoxFuture<'_, Result<Vec<SourceConfig>, PipelineError>> {
        let sources = self
            .sources
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| PipelineError::SourceProvider("source list lock poisoned".to_owned()));
        Box::pin(async move { sources })
    }
}

/// 운영자 알림 훅
///
/// 모든 메서드는 기본 구현이 비어 있으며 빠르게 반환해야 합니다.
/// 파이프라인 루프 안에서 동기적으로 호출됩니다.
pub trait AdminHooks: Send + Sync {
    /// 인증 실패로 소스가 멈췄을 때 호출됩니다.
    fn auth_failed(&self, _source: &SourceKey, _reason: &str) {}

    /// 소스가 비활성화되었을 때 호출됩니다.
    fn source_disabled(&self, _source: &SourceKey, _reason: &str) {}

    /// 콜드 스타트가 발생했을 때 호출됩니다.
    fn cold_start(&self, _source: &SourceKey, _reason: &str) {}

    /// 사이클이 실패했을 때 호출됩니다.
    fn cycle_failed(&self, _source: &SourceKey, _stage: &str, _error: &str) {}
}

/// 아무것도 하지 않는 훅
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdminHooks;

impl AdminHooks for NoopAdminHooks {}

/// 로그로만 남기는 훅
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAdminHooks;

impl AdminHooks for LoggingAdminHooks {
    fn auth_failed(&self, source: &SourceKey, reason: &str) {
        warn!(source = %source, reason, "source authentication failed, polling suspended");
    }

    fn source_disabled(&self, source: &SourceKey, reason: &str) {
        info!(source = %source, reason, "source disabled");
    }

    fn cold_start(&self, source: &SourceKey, reason: &str) {
        info!(source = %source, reason, "source cold start");
    }

    fn cycle_failed(&self, source: &SourceKey, stage: &str, error: &str) {
        warn!(source = %source, stage, error, "source cycle failed");
    }
}
