//! 파이프라인 오케스트레이션 -- 소스별 주기 사이클과 전달 루프를 관리합니다.
//!
//! [`IngestPipeline`]은 core의 [`Pipeline`] trait을 구현하여 `tailpost-daemon`이
//! start/stop/health_check 생명주기로 관리합니다.
//!
//! # 내부 아키텍처
//! ```text
//!                    ┌── source task (eu-1) ──┐
//! SourceProvider ──► │── source task (us-1) ──│──► CycleRunner ──► DeliveryBatcher ──► NotificationSink
//!   (refresh)        └── source task (...)  ──┘                        ▲
//!                                                              drain task (interval)
//! ```
//!
//! 소스마다 태스크 하나가 `poll_interval_secs`마다 사이클을 실행합니다. 소스 목록은
//! `source_refresh_secs`마다 다시 읽어 추가/변경/삭제를 반영합니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailpost_core::collab::{AdminHooks, NoopAdminHooks, SourceProvider, StaticSourceProvider};
use tailpost_core::error::{PipelineError, TailpostError};
use tailpost_core::metrics as m;
use tailpost_core::pipeline::{HealthStatus, Pipeline};
use tailpost_core::store::{MemoryStore, StateStore, TimeoutStore};
use tailpost_core::types::{SourceConfig, SourceKey};
use tailpost_remote::{RemoteConnector, SessionPool, Tailer};

use crate::batcher::DeliveryBatcher;
use crate::config::PipelineConfig;
use crate::controls::{IngestControls, SourceHandle, SourceRegistry};
use crate::cycle::{CycleError, CycleReport, CycleRunner, CycleStage};
use crate::error::IngestError;
use crate::extractor::{Extractor, RuleLoader};
use crate::sink::{LogSink, NotificationSink};

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 소스 목록 갱신 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// 새로 등록된 소스
    pub added: Vec<SourceKey>,
    /// 제거된 소스
    pub removed: Vec<SourceKey>,
    /// 설정이 바뀐 소스
    pub updated: Vec<SourceKey>,
}

/// 소스 태스크와 갱신을 담당하는 공유 스케줄러
struct Scheduler<C: RemoteConnector> {
    runner: Arc<CycleRunner<C>>,
    registry: Arc<SourceRegistry>,
    provider: Arc<dyn SourceProvider>,
    pool: Arc<SessionPool<C>>,
    store: Arc<dyn StateStore>,
    poll_interval: Duration,
    root: CancellationToken,
    source_tasks: Mutex<HashMap<SourceKey, JoinHandle<()>>>,
}

impl<C: RemoteConnector> Scheduler<C> {
    /// 제공자에서 소스 목록을 다시 읽어 레지스트리에 반영합니다.
    ///
    /// `spawn`이면 새 소스의 주기 태스크를 띄웁니다.
    async fn refresh(&self, spawn: bool) -> Result<RefreshReport, PipelineError> {
        let listed = self.provider.list_sources().await?;

        let mut desired: BTreeMap<SourceKey, SourceConfig> = BTreeMap::new();
        for config in listed {
            let key = config.key();
            if desired.insert(key.clone(), config).is_some() {
                warn!(source = %key, "duplicate source in provider list, keeping the last entry");
            }
        }

        let mut report = RefreshReport::default();

        for key in self.registry.keys().await {
            if !desired.contains_key(&key) {
                self.remove_source(&key).await;
                report.removed.push(key);
            }
        }

        for (key, config) in desired {
            match self.registry.get(&key).await {
                Some(handle) => {
                    if handle.replace_config(config) {
                        // credentials or host may have changed
                        self.pool.evict_source(&key).await;
                        info!(source = %key, "source config updated");
                        report.updated.push(key);
                    }
                }
                None => {
                    let handle = Arc::new(SourceHandle::new(config, &self.root));
                    self.registry.insert(Arc::clone(&handle)).await;
                    if spawn {
                        self.spawn_source(handle).await;
                    }
                    info!(source = %key, "source registered");
                    report.added.push(key);
                }
            }
        }

        let active = self.registry.len().await;
        gauge!(m::CYCLE_ACTIVE_SOURCES).set(active as f64);
        Ok(report)
    }

    async fn remove_source(&self, key: &SourceKey) {
        let Some(handle) = self.registry.remove(key).await else {
            return;
        };
        handle.cancellation().cancel();
        self.source_tasks.lock().await.remove(key);

        // wait for an in-flight cycle so its cursor write cannot land after the delete
        let _idle = handle.lock_cycle().await;
        if let Err(e) = self.store.delete_cursor(key).await {
            warn!(source = %key, error = %e, "failed to delete cursor of removed source");
        }
        self.pool.evict_source(key).await;
        info!(source = %key, "source removed");
    }

    /// 태스크가 없는 모든 등록 소스에 태스크를 띄웁니다.
    async fn spawn_missing(&self) {
        for handle in self.registry.handles().await {
            let running = self.source_tasks.lock().await.contains_key(handle.key());
            if !running {
                self.spawn_source(handle).await;
            }
        }
    }

    async fn spawn_source(&self, handle: Arc<SourceHandle>) {
        let key = handle.key().clone();
        let runner = Arc::clone(&self.runner);
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let cancel = handle.cancellation().clone();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !handle.is_active() {
                            debug!(source = %handle.key(), "source inactive, skipping cycle");
                            continue;
                        }
                        // failures are recorded on the handle and reported through hooks
                        let _ = runner.run_cycle(&handle).await;
                    }
                }
            }
            debug!(source = %handle.key(), "source task stopped");
        });

        self.source_tasks.lock().await.insert(key, task);
    }

    async fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        self.source_tasks
            .lock()
            .await
            .drain()
            .map(|(_, task)| task)
            .collect()
    }
}

/// 원격 로그 수집 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use std::sync::Arc;
/// use tailpost_log_pipeline::{IngestPipelineBuilder, PipelineConfig};
/// use tailpost_remote::SshConnector;
///
/// let mut pipeline = IngestPipelineBuilder::new(Arc::new(SshConnector::new()))
///     .config(config)
///     .store(store)
///     .sink(sink)
///     .source_provider(provider)
///     .build()?;
///
/// pipeline.start().await?;
/// let controls = pipeline.controls();
/// ```
pub struct IngestPipeline<C: RemoteConnector> {
    config: PipelineConfig,
    state: PipelineState,
    scheduler: Arc<Scheduler<C>>,
    batcher: Arc<DeliveryBatcher>,
    hooks: Arc<dyn AdminHooks>,
    extractor_fixed: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: RemoteConnector> IngestPipeline<C> {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 운영 제어 핸들
    pub fn controls(&self) -> IngestControls {
        IngestControls::new(
            Arc::clone(&self.scheduler.registry),
            Arc::clone(&self.scheduler.store),
            Arc::clone(&self.hooks),
        )
    }

    /// 전달 배처
    pub fn batcher(&self) -> &Arc<DeliveryBatcher> {
        &self.batcher
    }

    /// 원격 세션 풀
    pub fn pool(&self) -> &Arc<SessionPool<C>> {
        &self.scheduler.pool
    }

    /// 등록된 소스 수
    pub async fn source_count(&self) -> usize {
        self.scheduler.registry.len().await
    }

    /// 소스 목록을 즉시 다시 읽습니다.
    ///
    /// 실행 중이면 새 소스의 태스크도 띄웁니다. 실패하면 기존 목록을 유지합니다.
    pub async fn refresh_sources(&self) -> Result<RefreshReport, IngestError> {
        Ok(self
            .scheduler
            .refresh(self.state == PipelineState::Running)
            .await?)
    }

    /// 소스 사이클 한 번을 즉시 실행합니다.
    ///
    /// 주기 태스크와 같은 잠금을 사용하므로 겹쳐 실행되지 않습니다.
    pub async fn poll_source(&self, key: &SourceKey) -> Result<CycleReport, CycleError> {
        let handle = self.scheduler.registry.get(key).await.ok_or_else(|| {
            CycleError::new(CycleStage::Idle, IngestError::UnknownSource(key.to_string()))
        })?;
        self.scheduler.runner.run_cycle(&handle).await
    }

    async fn load_custom_rules(&mut self) -> Result<(), IngestError> {
        if self.extractor_fixed {
            return Ok(());
        }
        let Some(path) = self.config.rules_path() else {
            return Ok(());
        };

        let custom = RuleLoader::load_file(&path).await?;
        let extractor = Extractor::with_custom(custom)?;
        info!(
            path = %path.display(),
            rules = extractor.rule_count(),
            "loaded extraction rules"
        );

        let current = &self.scheduler;
        let runner = CycleRunner::new(
            Arc::clone(&current.pool),
            Tailer::new(self.config.tail_settings()),
            Arc::new(extractor),
            Arc::clone(&current.store),
            Arc::clone(&self.batcher),
            Arc::clone(&self.hooks),
        );
        self.scheduler = Arc::new(Scheduler {
            runner: Arc::new(runner),
            registry: Arc::clone(&current.registry),
            provider: Arc::clone(&current.provider),
            pool: Arc::clone(&current.pool),
            store: Arc::clone(&current.store),
            poll_interval: current.poll_interval,
            root: current.root.clone(),
            source_tasks: Mutex::new(HashMap::new()),
        });
        Ok(())
    }

    async fn health_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let threshold = self.config.failure_threshold;

        let handles = self.scheduler.registry.handles().await;
        let auth_failed = handles.iter().filter(|h| h.is_auth_failed()).count();
        let failing = handles
            .iter()
            .filter(|h| h.consecutive_failures() >= threshold)
            .count();
        if auth_failed > 0 {
            issues.push(format!("{auth_failed} source(s) failed authentication"));
        }
        if failing > 0 {
            issues.push(format!(
                "{failing} source(s) failed {threshold}+ consecutive cycles"
            ));
        }

        let pending = self.batcher.pending().await;
        let backlog_limit = self.batcher.settings().per_minute_cap * 5;
        if pending > backlog_limit {
            issues.push(format!("delivery backlog of {pending} notifications"));
        }
        issues
    }
}

impl<C: RemoteConnector> Pipeline for IngestPipeline<C> {
    async fn start(&mut self) -> Result<(), TailpostError> {
        match self.state {
            PipelineState::Running => return Err(PipelineError::AlreadyRunning.into()),
            PipelineState::Stopped => {
                return Err(PipelineError::InitFailed(
                    "pipeline was stopped; build a new pipeline to restart".to_owned(),
                )
                .into());
            }
            PipelineState::Initialized => {}
        }

        info!("starting ingest pipeline");

        // 1. 사용자 추출 규칙
        self.load_custom_rules().await?;

        // 2. 초기 소스 목록
        let report = self.scheduler.refresh(false).await?;
        let sources = self.source_count().await;
        info!(sources, added = report.added.len(), "initial sources loaded");

        // 3. 소스 태스크
        self.scheduler.spawn_missing().await;

        // 4. 소스 목록 갱신 루프
        let scheduler = Arc::clone(&self.scheduler);
        let refresh_every = self.config.source_refresh();
        let cancel = self.scheduler.root.child_token();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + refresh_every, refresh_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.refresh(true).await {
                            warn!(error = %e, "source refresh failed, keeping previous list");
                        }
                    }
                }
            }
        }));

        // 5. 전달 드레인 루프
        let batcher = Arc::clone(&self.batcher);
        let cancel = self.scheduler.root.child_token();
        self.tasks
            .push(tokio::spawn(async move { batcher.run(cancel).await }));

        self.state = PipelineState::Running;
        info!("ingest pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TailpostError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping ingest pipeline");

        // 1. 모든 태스크 취소 후 유예 시간 동안 대기
        self.scheduler.root.cancel();
        let mut tasks = self.scheduler.take_tasks().await;
        tasks.append(&mut self.tasks);

        let deadline = Instant::now() + self.config.shutdown_grace();
        let mut aborted = 0usize;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(aborted, "tasks did not finish within shutdown grace period");
        }

        // 2. 남은 알림 전송
        let report = self.batcher.flush_all(self.config.flush_deadline()).await;
        if report.remaining > 0 {
            warn!(remaining = report.remaining, "undelivered notifications discarded at shutdown");
        }

        // 3. 원격 세션 정리
        self.scheduler.pool.close_all().await;

        self.state = PipelineState::Stopped;
        info!("ingest pipeline stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                let issues = self.health_issues().await;
                if issues.is_empty() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded(issues.join("; "))
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 수집 파이프라인 빌더
///
/// 설정하지 않은 협력자는 기본 구현을 사용합니다: 메모리 저장소, 로그 싱크,
/// 빈 정적 소스 목록, 아무것도 하지 않는 훅.
pub struct IngestPipelineBuilder<C: RemoteConnector> {
    connector: Arc<C>,
    config: PipelineConfig,
    store: Option<Arc<dyn StateStore>>,
    sink: Option<Arc<dyn NotificationSink>>,
    provider: Option<Arc<dyn SourceProvider>>,
    hooks: Option<Arc<dyn AdminHooks>>,
    extractor: Option<Extractor>,
}

impl<C: RemoteConnector> IngestPipelineBuilder<C> {
    /// 원격 커넥터로 새 빌더를 생성합니다.
    pub fn new(connector: Arc<C>) -> Self {
        Self {
            connector,
            config: PipelineConfig::default(),
            store: None,
            sink: None,
            provider: None,
            hooks: None,
            extractor: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 상태 저장소를 지정합니다. 빌드 시 호출 타임아웃 래퍼가 씌워집니다.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 알림 싱크를 지정합니다.
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 소스 목록 제공자를 지정합니다.
    pub fn source_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// 운영자 훅을 지정합니다.
    pub fn admin_hooks(mut self, hooks: Arc<dyn AdminHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// 추출기를 직접 지정합니다. 지정하면 `rules_file`은 무시됩니다.
    pub fn extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// 파이프라인을 빌드합니다.
    pub fn build(self) -> Result<IngestPipeline<C>, IngestError> {
        self.config.validate()?;

        let inner_store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn StateStore>);
        let store: Arc<dyn StateStore> =
            Arc::new(TimeoutStore::new(inner_store, self.config.store_timeout()));
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(LogSink) as Arc<dyn NotificationSink>);
        let provider = self.provider.unwrap_or_else(|| {
            Arc::new(StaticSourceProvider::new(Vec::new())) as Arc<dyn SourceProvider>
        });
        let hooks = self
            .hooks
            .unwrap_or_else(|| Arc::new(NoopAdminHooks) as Arc<dyn AdminHooks>);

        let extractor_fixed = self.extractor.is_some();
        let extractor = match self.extractor {
            Some(extractor) => extractor,
            None => Extractor::builtin()?,
        };

        let pool = Arc::new(SessionPool::from_config(self.connector, &self.config.remote));
        let batcher = Arc::new(DeliveryBatcher::new(sink, self.config.batcher_settings()));
        let runner = CycleRunner::new(
            Arc::clone(&pool),
            Tailer::new(self.config.tail_settings()),
            Arc::new(extractor),
            Arc::clone(&store),
            Arc::clone(&batcher),
            Arc::clone(&hooks),
        );

        let scheduler = Scheduler {
            runner: Arc::new(runner),
            registry: Arc::new(SourceRegistry::new()),
            provider,
            pool,
            store,
            poll_interval: self.config.poll_interval(),
            root: CancellationToken::new(),
            source_tasks: Mutex::new(HashMap::new()),
        };

        Ok(IngestPipeline {
            config: self.config,
            state: PipelineState::Initialized,
            scheduler: Arc::new(scheduler),
            batcher,
            hooks,
            extractor_fixed,
            tasks: Vec::new(),
        })
    }
}
