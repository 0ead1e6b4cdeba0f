//! 소스 사이클 -- 접속, 테일, 추출, 상태 적용, 알림 큐잉, 반납
//!
//! ```text
//! Idle -> AcquireConn -> Tail -> Extract -> ApplyState -> EnqueueNotifications -> ReleaseConn -> Idle
//!              │           │        │           │                 │
//!              └───────────┴────────┴───────────┴─────────────────┴──> ReleaseConn -> Idle (실패)
//! ```
//!
//! 커서는 `EnqueueNotifications`의 마지막 단계에서만 저장됩니다. 중간에 실패하거나
//! 중단된 사이클은 다음 사이클에서 같은 구간을 다시 읽습니다.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, histogram};
use serde::Serialize;
use tailpost_core::collab::AdminHooks;
use tailpost_core::metrics as m;
use tailpost_core::store::StateStore;
use tailpost_core::types::{SourceConfig, SourceKey};
use tailpost_remote::{
    ColdStartReason, ConnectionLease, RemoteConnector, SessionPool, TailOutcome, TailRequest,
    Tailer,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batcher::{DeliveryBatcher, EnqueueResult};
use crate::controls::{CycleSummary, SourceHandle};
use crate::error::IngestError;
use crate::extractor::{EventCategory, Extractor, RawEvent};
use crate::notify::{Notice, event_notice, presence_notice};
use crate::session::{ApplyOutcome, SessionMachine};

/// 사이클 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    /// 대기
    Idle,
    /// 세션 임대
    AcquireConn,
    /// 증분 읽기
    Tail,
    /// 이벤트 추출
    Extract,
    /// 세션 상태 적용
    ApplyState,
    /// 알림 큐잉과 커서 저장
    EnqueueNotifications,
    /// 세션 반납
    ReleaseConn,
}

impl CycleStage {
    /// 라벨/로그용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AcquireConn => "acquire_conn",
            Self::Tail => "tail",
            Self::Extract => "extract",
            Self::ApplyState => "apply_state",
            Self::EnqueueNotifications => "enqueue_notifications",
            Self::ReleaseConn => "release_conn",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 실패한 단계와 원인
#[derive(Debug, thiserror::Error)]
#[error("cycle failed at {stage}: {error}")]
pub struct CycleError {
    /// 실패 단계
    pub stage: CycleStage,
    /// 원인
    #[source]
    pub error: IngestError,
}

impl CycleError {
    pub(crate) fn new(stage: CycleStage, error: impl Into<IngestError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }

    /// 소스 비활성화나 종료로 중단된 경우
    pub fn is_abort(&self) -> bool {
        self.error.is_abort()
    }

    fn requires_eviction(&self) -> bool {
        matches!(&self.error, IngestError::Remote(e) if e.requires_eviction())
    }
}

/// 성공한 사이클의 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 콜드 스타트였다면 그 사유
    pub cold_start: Option<ColdStartReason>,
    /// 읽은 라인 수
    pub lines: usize,
    /// 추출된 이벤트 수
    pub events: usize,
    /// 저장된 세션 전이 수
    pub transitions: usize,
    /// 오프라인으로 정리된 세션 수
    pub reconciled: usize,
    /// 큐에 들어간 알림 수
    pub enqueued: usize,
    /// 쿨다운으로 억제된 알림 수
    pub duplicates: usize,
    /// 목적지가 지정되지 않아 버린 알림 수
    pub unrouted: usize,
    /// 저장된 커서 offset
    pub offset: u64,
    /// 읽기 한도 때문에 남은 데이터가 있는지
    pub backlog: bool,
}

/// 사이클 실행에 필요한 공유 구성 요소
pub struct CycleRunner<C: RemoteConnector> {
    pool: Arc<SessionPool<C>>,
    tailer: Tailer,
    extractor: Arc<Extractor>,
    sessions: SessionMachine,
    store: Arc<dyn StateStore>,
    batcher: Arc<DeliveryBatcher>,
    hooks: Arc<dyn AdminHooks>,
}

impl<C: RemoteConnector> CycleRunner<C> {
    /// 새 실행기를 만듭니다.
    pub fn new(
        pool: Arc<SessionPool<C>>,
        tailer: Tailer,
        extractor: Arc<Extractor>,
        store: Arc<dyn StateStore>,
        batcher: Arc<DeliveryBatcher>,
        hooks: Arc<dyn AdminHooks>,
    ) -> Self {
        Self {
            pool,
            tailer,
            extractor,
            sessions: SessionMachine::new(Arc::clone(&store)),
            store,
            batcher,
            hooks,
        }
    }

    /// 소스 사이클 한 번을 실행합니다.
    ///
    /// 같은 소스의 사이클은 핸들의 잠금으로 직렬화됩니다. 결과는 핸들에 기록되고
    /// 실패는 운영자 훅으로 전달됩니다.
    pub async fn run_cycle(&self, handle: &SourceHandle) -> Result<CycleReport, CycleError> {
        let _running = handle.lock_cycle().await;
        let key = handle.key().clone();
        let source = key.to_string();
        let started = Instant::now();

        let result = self.execute(handle).await;

        histogram!(m::CYCLE_DURATION_SECONDS, m::LABEL_SOURCE => source.clone())
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(report) => {
                counter!(m::CYCLE_RUNS_TOTAL, m::LABEL_RESULT => "success").increment(1);
                handle.record_cycle(
                    CycleSummary {
                        finished_at: Utc::now(),
                        succeeded: true,
                        stage: CycleStage::Idle,
                        events: report.events,
                        enqueued: report.enqueued,
                        error: None,
                    },
                    false,
                );
                if report.events > 0 || report.cold_start.is_some() {
                    info!(
                        source = %key,
                        lines = report.lines,
                        events = report.events,
                        transitions = report.transitions,
                        enqueued = report.enqueued,
                        offset = report.offset,
                        "cycle completed"
                    );
                } else {
                    debug!(source = %key, offset = report.offset, "cycle completed, nothing new");
                }
            }
            Err(e) if e.is_abort() => {
                counter!(m::CYCLE_RUNS_TOTAL, m::LABEL_RESULT => "aborted").increment(1);
                handle.record_cycle(failure_summary(e), false);
                info!(source = %key, stage = %e.stage, reason = %e.error, "cycle aborted");
            }
            Err(e) => {
                counter!(m::CYCLE_RUNS_TOTAL, m::LABEL_RESULT => "failure").increment(1);
                counter!(
                    m::CYCLE_FAILURES_TOTAL,
                    m::LABEL_SOURCE => source,
                    m::LABEL_STAGE => e.stage.as_str()
                )
                .increment(1);
                handle.record_cycle(failure_summary(e), true);
                warn!(
                    tenant = %key.tenant_id,
                    source = %key.source_id,
                    stage = %e.stage,
                    error = %e.error,
                    "cycle failed"
                );
                self.hooks
                    .cycle_failed(&key, e.stage.as_str(), &e.error.to_string());
            }
        }
        result
    }

    async fn execute(&self, handle: &SourceHandle) -> Result<CycleReport, CycleError> {
        let key = handle.key();
        let config = handle.config();

        checkpoint(handle, CycleStage::AcquireConn)?;
        let credentials = config
            .credentials()
            .map_err(|e| CycleError::new(CycleStage::AcquireConn, e))?;

        let mut lease = match self.pool.acquire(key, &credentials).await {
            Ok(lease) => lease,
            Err(e) => {
                if e.is_auth() && handle.latch_auth_failure() {
                    self.hooks.auth_failed(key, &e.to_string());
                }
                return Err(CycleError::new(CycleStage::AcquireConn, e));
            }
        };

        let result = self.with_lease(handle, &config, &mut lease).await;

        // ReleaseConn
        let evict = lease.is_poisoned() || result.as_ref().is_err_and(CycleError::requires_eviction);
        if evict {
            self.pool.evict(lease).await;
        } else {
            self.pool.release(lease).await;
        }
        result
    }

    async fn with_lease(
        &self,
        handle: &SourceHandle,
        config: &SourceConfig,
        lease: &mut ConnectionLease<C::Session>,
    ) -> Result<CycleReport, CycleError> {
        let key = handle.key();
        let mut report = CycleReport::default();

        // Tail
        checkpoint(handle, CycleStage::Tail)?;
        let cursor = self
            .store
            .get_cursor(key)
            .await
            .map_err(|e| CycleError::new(CycleStage::Tail, e))?;
        let cold_requests = handle.pending_cold_starts();
        let outcome = self
            .tailer
            .read_new(
                lease,
                TailRequest {
                    key: key.clone(),
                    path_pattern: config.remote_path.clone(),
                    cursor,
                    force_cold: cold_requests > 0,
                },
            )
            .await
            .map_err(|e| CycleError::new(CycleStage::Tail, e))?;
        report.cold_start = outcome.cold_start;
        report.lines = outcome.lines.len();
        report.backlog = outcome.backlog;
        if let Some(reason) = outcome.cold_start {
            self.hooks.cold_start(key, reason.as_str());
        }

        // Extract
        checkpoint(handle, CycleStage::Extract)?;
        let events = self.extractor.extract_all(&outcome.lines);
        report.events = events.len();

        // ApplyState
        checkpoint(handle, CycleStage::ApplyState)?;
        let notices = self
            .apply_events(key, &outcome, &events, &mut report)
            .await
            .map_err(|e| CycleError::new(CycleStage::ApplyState, e))?;

        // EnqueueNotifications
        checkpoint(handle, CycleStage::EnqueueNotifications)?;
        for notice in notices {
            let Some(destination) = notice.destination(&config.destinations) else {
                report.unrouted += 1;
                continue;
            };
            match self
                .batcher
                .enqueue(destination, notice.payload, notice.dedup_key)
                .await
            {
                EnqueueResult::Queued => report.enqueued += 1,
                EnqueueResult::Duplicate => report.duplicates += 1,
            }
        }

        report.offset = outcome.cursor.offset;
        self.store
            .put_cursor(outcome.cursor)
            .await
            .map_err(|e| CycleError::new(CycleStage::EnqueueNotifications, e))?;
        handle.consume_cold_starts(cold_requests);

        Ok(report)
    }

    /// 이벤트를 세션에 적용하고 보낼 알림을 모읍니다.
    async fn apply_events(
        &self,
        key: &SourceKey,
        outcome: &TailOutcome,
        events: &[RawEvent],
        report: &mut CycleReport,
    ) -> Result<Vec<Notice>, IngestError> {
        if outcome.cold_start.is_some() {
            report.reconciled += self.sessions.close_open_sessions(key).await?;
            return Ok(Vec::new());
        }

        let mut notices = Vec::new();
        for event in events {
            if event.category == EventCategory::ServerShutdown {
                report.reconciled += self
                    .sessions
                    .reconcile_offline(key, event.timestamp)
                    .await?;
                continue;
            }
            if event.category.is_presence() {
                if let ApplyOutcome::Transition(transition) = self.sessions.apply(key, event).await? {
                    report.transitions += 1;
                    notices.extend(presence_notice(key, &transition));
                }
                continue;
            }
            notices.extend(event_notice(key, event));
        }
        Ok(notices)
    }
}

/// 단계 진입 전에 소스가 아직 활성인지 확인합니다.
fn checkpoint(handle: &SourceHandle, stage: CycleStage) -> Result<(), CycleError> {
    if handle.cancellation().is_cancelled() {
        return Err(CycleError::new(stage, IngestError::Cancelled));
    }
    if !handle.is_active() {
        return Err(CycleError::new(
            stage,
            IngestError::SourceDisabled(handle.key().to_string()),
        ));
    }
    Ok(())
}

fn failure_summary(e: &CycleError) -> CycleSummary {
    CycleSummary {
        finished_at: Utc::now(),
        succeeded: false,
        stage: e.stage,
        events: 0,
        enqueued: 0,
        error: Some(e.error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tailpost_core::error::StoreError;
    use tailpost_remote::RemoteError;

    #[test]
    fn stage_names_are_snake_case() {
        assert_eq!(CycleStage::AcquireConn.as_str(), "acquire_conn");
        assert_eq!(
            CycleStage::EnqueueNotifications.to_string(),
            "enqueue_notifications"
        );
        assert_eq!(
            serde_json::to_value(CycleStage::ApplyState).unwrap(),
            "apply_state"
        );
    }

    #[test]
    fn transport_errors_evict_but_store_errors_do_not() {
        let transport = CycleError::new(
            CycleStage::Tail,
            RemoteError::Protocol("channel closed".to_owned()),
        );
        assert!(transport.requires_eviction());
        assert!(!transport.is_abort());

        let store = CycleError::new(
            CycleStage::Tail,
            StoreError::Timeout {
                operation: "get_cursor",
                after: Duration::from_secs(5),
            },
        );
        assert!(!store.requires_eviction());
    }

    #[test]
    fn disabled_and_cancelled_are_aborts() {
        let disabled = CycleError::new(
            CycleStage::Extract,
            IngestError::SourceDisabled("guild-1/eu-1".to_owned()),
        );
        assert!(disabled.is_abort());
        assert!(disabled.to_string().contains("extract"));
        assert!(CycleError::new(CycleStage::Tail, IngestError::Cancelled).is_abort());
    }
}
