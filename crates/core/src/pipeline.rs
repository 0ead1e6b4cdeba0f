//! 파이프라인 trait -- 생명주기 관리 인터페이스
//!
//! 데몬은 [`Pipeline`]을 구현하는 구성 요소의 시작/정지/상태 확인만
//! 알면 됩니다. 구체 구현은 `tailpost-log-pipeline`에 있습니다.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::TailpostError;

/// `Send` 가능한 boxed future
///
/// dyn 호환이 필요한 협력자 trait(예: [`SourceProvider`](crate::collab::SourceProvider))에서 사용합니다.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 구성 요소 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// 정상 동작
    Healthy,
    /// 일부 기능 저하 (사유 포함)
    Degraded(String),
    /// 동작 불가 (사유 포함)
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 시작/정지/상태 확인을 제공하는 파이프라인 trait
///
/// `start()`는 백그라운드 태스크를 띄운 뒤 즉시 반환해야 하며,
/// `stop()`은 모든 태스크가 정리된 뒤 반환해야 합니다.
pub trait Pipeline: Send + Sync {
    /// 파이프라인을 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), TailpostError>> + Send;

    /// 파이프라인을 정지합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), TailpostError>> + Send;

    /// 현재 상태를 반환합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
