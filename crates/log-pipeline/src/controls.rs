//! 소스 레지스트리와 운영 제어
//!
//! 각 소스는 [`SourceHandle`] 하나로 표현되며, 사이클 태스크와 [`IngestControls`]가
//! 같은 핸들을 공유합니다. 비활성화 요청은 핸들의 플래그만 바꾸고, 실행 중인
//! 사이클은 다음 단계 진입 전에 이를 확인하여 중단합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tailpost_core::collab::AdminHooks;
use tailpost_core::store::StateStore;
use tailpost_core::types::{ActiveCounts, SourceConfig, SourceKey};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cycle::CycleStage;
use crate::error::IngestError;

/// 마지막 사이클 요약
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// 종료 시각
    pub finished_at: DateTime<Utc>,
    /// 성공 여부
    pub succeeded: bool,
    /// 실패했다면 실패 단계, 성공했다면 `idle`
    pub stage: CycleStage,
    /// 추출된 이벤트 수
    pub events: usize,
    /// 큐에 들어간 알림 수
    pub enqueued: usize,
    /// 에러 메시지
    pub error: Option<String>,
}

/// 소스 상태 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    /// 소스 키
    pub key: SourceKey,
    /// 소스 설정의 enabled 값
    pub configured_enabled: bool,
    /// 운영자 활성화 여부
    pub admin_enabled: bool,
    /// 인증 실패로 멈춤
    pub auth_failed: bool,
    /// 대기 중인 강제 콜드 스타트 요청
    pub cold_start_pending: bool,
    /// 연속 실패 횟수
    pub consecutive_failures: u32,
    /// 마지막 사이클
    pub last_cycle: Option<CycleSummary>,
}

/// 소스 하나의 공유 상태
#[derive(Debug)]
pub struct SourceHandle {
    key: SourceKey,
    config: StdRwLock<SourceConfig>,
    admin_enabled: AtomicBool,
    auth_failed: AtomicBool,
    cold_requests: AtomicU64,
    consecutive_failures: AtomicU32,
    cycle_lock: Mutex<()>,
    last_cycle: StdMutex<Option<CycleSummary>>,
    cancel: CancellationToken,
}

impl SourceHandle {
    /// 소스 설정으로 핸들을 만듭니다. 취소 토큰은 `parent`의 자식입니다.
    pub fn new(config: SourceConfig, parent: &CancellationToken) -> Self {
        Self {
            key: config.key(),
            config: StdRwLock::new(config),
            admin_enabled: AtomicBool::new(true),
            auth_failed: AtomicBool::new(false),
            cold_requests: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            cycle_lock: Mutex::new(()),
            last_cycle: StdMutex::new(None),
            cancel: parent.child_token(),
        }
    }

    /// 소스 키
    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// 현재 설정 사본
    pub fn config(&self) -> SourceConfig {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 설정을 교체합니다. 내용이 달라졌으면 `true`를 반환합니다.
    pub fn replace_config(&self, config: SourceConfig) -> bool {
        let mut guard = match self.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard == config {
            return false;
        }
        *guard = config;
        true
    }

    /// 사이클을 진행해도 되는지 확인합니다.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.admin_enabled.load(Ordering::Acquire)
            && !self.auth_failed.load(Ordering::Acquire)
            && self.config().enabled
    }

    /// 운영자 활성화 여부를 바꿉니다.
    pub fn set_admin_enabled(&self, enabled: bool) {
        self.admin_enabled.store(enabled, Ordering::Release);
    }

    /// 인증 실패 상태인지 확인합니다.
    pub fn is_auth_failed(&self) -> bool {
        self.auth_failed.load(Ordering::Acquire)
    }

    /// 인증 실패를 기록합니다. 이미 기록되어 있었다면 `false`를 반환합니다.
    pub fn latch_auth_failure(&self) -> bool {
        !self.auth_failed.swap(true, Ordering::AcqRel)
    }

    /// 인증 실패 기록과 연속 실패 횟수를 지웁니다.
    pub fn clear_failures(&self) {
        self.auth_failed.store(false, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// 다음 사이클의 콜드 스타트를 요청합니다.
    pub fn request_cold_start(&self) {
        self.cold_requests.fetch_add(1, Ordering::AcqRel);
    }

    /// 현재까지 쌓인 콜드 스타트 요청 수
    pub fn pending_cold_starts(&self) -> u64 {
        self.cold_requests.load(Ordering::Acquire)
    }

    /// 사이클이 처리한 요청 수만큼 콜드 스타트 요청을 소비합니다.
    ///
    /// 사이클 도중 들어온 요청은 남아 다음 사이클에 적용됩니다.
    pub fn consume_cold_starts(&self, handled: u64) {
        if handled == 0 {
            return;
        }
        let _ = self
            .cold_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(handled))
            });
    }

    /// 연속 실패 횟수
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// 사이클 결과를 기록합니다.
    pub fn record_cycle(&self, summary: CycleSummary, counts_as_failure: bool) {
        if summary.succeeded {
            self.consecutive_failures.store(0, Ordering::Release);
        } else if counts_as_failure {
            self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
        }
        match self.last_cycle.lock() {
            Ok(mut guard) => *guard = Some(summary),
            Err(poisoned) => *poisoned.into_inner() = Some(summary),
        }
    }

    /// 같은 소스의 사이클이 겹치지 않도록 잠급니다.
    pub async fn lock_cycle(&self) -> MutexGuard<'_, ()> {
        self.cycle_lock.lock().await
    }

    /// 소스 태스크 취소 토큰
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 상태 스냅샷을 만듭니다.
    pub fn status(&self) -> SourceStatus {
        let last_cycle = match self.last_cycle.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        SourceStatus {
            key: self.key.clone(),
            configured_enabled: self.config().enabled,
            admin_enabled: self.admin_enabled.load(Ordering::Acquire),
            auth_failed: self.is_auth_failed(),
            cold_start_pending: self.pending_cold_starts() > 0,
            consecutive_failures: self.consecutive_failures(),
            last_cycle,
        }
    }
}

/// 등록된 소스 목록
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<SourceKey, Arc<SourceHandle>>>,
}

impl SourceRegistry {
    /// 빈 레지스트리를 만듭니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 핸들을 조회합니다.
    pub async fn get(&self, key: &SourceKey) -> Option<Arc<SourceHandle>> {
        self.sources.read().await.get(key).cloned()
    }

    /// 핸들을 등록합니다. 같은 키가 있으면 교체된 이전 핸들을 반환합니다.
    pub async fn insert(&self, handle: Arc<SourceHandle>) -> Option<Arc<SourceHandle>> {
        self.sources
            .write()
            .await
            .insert(handle.key().clone(), handle)
    }

    /// 핸들을 제거합니다.
    pub async fn remove(&self, key: &SourceKey) -> Option<Arc<SourceHandle>> {
        self.sources.write().await.remove(key)
    }

    /// 등록된 모든 핸들
    pub async fn handles(&self) -> Vec<Arc<SourceHandle>> {
        self.sources.read().await.values().cloned().collect()
    }

    /// 등록된 소스 키
    pub async fn keys(&self) -> Vec<SourceKey> {
        self.sources.read().await.keys().cloned().collect()
    }

    /// 등록된 소스 수
    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    /// 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    async fn require(&self, key: &SourceKey) -> Result<Arc<SourceHandle>, IngestError> {
        self.get(key)
            .await
            .ok_or_else(|| IngestError::UnknownSource(key.to_string()))
    }
}

/// 관리 계층이 호출하는 운영 제어 핸들
///
/// 복제 비용이 작으며 파이프라인이 정지한 뒤에도 안전하게 호출할 수 있습니다.
#[derive(Clone)]
pub struct IngestControls {
    registry: Arc<SourceRegistry>,
    store: Arc<dyn StateStore>,
    hooks: Arc<dyn AdminHooks>,
}

impl IngestControls {
    /// 새 제어 핸들을 만듭니다.
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<dyn StateStore>,
        hooks: Arc<dyn AdminHooks>,
    ) -> Self {
        Self {
            registry,
            store,
            hooks,
        }
    }

    /// 다음 사이클을 콜드 스타트로 실행하도록 요청합니다.
    ///
    /// 콜드 스타트는 열린 세션을 모두 `offline`으로 정리하고 현재 끝에서
    /// 새 기준선을 잡습니다.
    pub async fn force_cold_start(&self, key: &SourceKey) -> Result<(), IngestError> {
        let handle = self.registry.require(key).await?;
        handle.request_cold_start();
        info!(source = %key, "cold start requested");
        Ok(())
    }

    /// 소스의 활성 세션 수 (접속 중 + 대기열)
    pub async fn get_active_count(&self, key: &SourceKey) -> Result<ActiveCounts, IngestError> {
        self.registry.require(key).await?;
        let sessions = self.store.sessions_for_source(key).await?;
        Ok(ActiveCounts::from_sessions(&sessions))
    }

    /// 소스를 비활성화합니다. 실행 중인 사이클은 다음 단계 전에 중단됩니다.
    pub async fn disable_source(&self, key: &SourceKey, reason: &str) -> Result<(), IngestError> {
        let handle = self.registry.require(key).await?;
        handle.set_admin_enabled(false);
        self.hooks.source_disabled(key, reason);
        Ok(())
    }

    /// 소스를 다시 활성화하고 인증 실패 기록을 지웁니다.
    pub async fn enable_source(&self, key: &SourceKey) -> Result<(), IngestError> {
        let handle = self.registry.require(key).await?;
        handle.set_admin_enabled(true);
        handle.clear_failures();
        info!(source = %key, "source enabled");
        Ok(())
    }

    /// 소스 상태를 조회합니다.
    pub async fn source_status(&self, key: &SourceKey) -> Result<SourceStatus, IngestError> {
        Ok(self.registry.require(key).await?.status())
    }

    /// 모든 소스 상태를 키 순서로 조회합니다.
    pub async fn all_statuses(&self) -> Vec<SourceStatus> {
        let mut statuses: Vec<_> = self
            .registry
            .handles()
            .await
            .iter()
            .map(|h| h.status())
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }
}
