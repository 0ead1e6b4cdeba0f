//! 원격 세션 풀
//!
//! 소스당 최대 하나의 세션을 보관하며, 유휴 시간이 임계값 미만이면 재사용합니다.
//! 새 접속은 전송 전략 목록을 순서대로 시도하고 첫 성공에서 멈춥니다.
//!
//! # 생명주기
//! ```text
//! acquire() ──► ConnectionLease ──► run(..) * N ──┬─► release()  (정상: 풀에 반납)
//!                                                 └─► evict()    (전송 에러: 닫고 폐기)
//! ```
//!
//! 인증 실패는 다른 전략으로 재시도하지 않고 즉시 반환합니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tailpost_core::cache::TtlCache;
use tailpost_core::config::RemoteConfig;
use tailpost_core::metrics as m;
use tailpost_core::types::{SourceCredentials, SourceKey};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connector::{RemoteConnector, RemoteSession};
use crate::error::RemoteError;
use crate::strategy::{TransportStrategy, attempt_order, strategies_from_config};
use crate::worker::WorkerPool;

/// 풀 타이밍 설정
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// 전략당 접속 타임아웃
    pub connect_timeout: Duration,
    /// 세션 I/O 타임아웃
    pub io_timeout: Duration,
    /// 유휴 세션 재사용 한도
    pub idle_threshold: Duration,
    /// 호스트별 성공 전략 기억 시간
    pub strategy_cache_ttl: Duration,
}

impl PoolSettings {
    /// 설정 섹션에서 생성합니다.
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            io_timeout: Duration::from_secs(config.io_timeout_secs),
            idle_threshold: Duration::from_secs(config.idle_threshold_secs),
            strategy_cache_ttl: Duration::from_secs(config.strategy_cache_ttl_secs),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

/// 풀에 반납된 유휴 세션
struct IdleSession<S> {
    session: S,
    strategy: String,
    connected_at: Instant,
    last_used: Instant,
}

/// 원격 세션 풀
pub struct SessionPool<C: RemoteConnector> {
    connector: Arc<C>,
    workers: WorkerPool,
    strategies: Arc<Vec<TransportStrategy>>,
    settings: PoolSettings,
    idle: Mutex<HashMap<SourceKey, IdleSession<C::Session>>>,
    preferred: Mutex<TtlCache<String, usize>>,
}

impl<C: RemoteConnector> SessionPool<C> {
    /// 새 풀을 생성합니다.
    pub fn new(
        connector: Arc<C>,
        workers: WorkerPool,
        strategies: Vec<TransportStrategy>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            connector,
            workers,
            strategies: Arc::new(strategies),
            preferred: Mutex::new(TtlCache::new(settings.strategy_cache_ttl)),
            settings,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// 설정 섹션에서 풀과 작업자 풀을 함께 생성합니다.
    pub fn from_config(connector: Arc<C>, config: &RemoteConfig) -> Self {
        Self::new(
            connector,
            WorkerPool::new(config.max_workers),
            strategies_from_config(config),
            PoolSettings::from_config(config),
        )
    }

    /// 블로킹 작업자 풀
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// 소스용 세션을 빌립니다.
    ///
    /// 유휴 세션이 `idle_threshold`보다 최근에 사용되었으면 재사용하고, 아니면
    /// 전략 목록으로 새로 접속합니다. 호스트에서 마지막으로 성공한 전략을 먼저
    /// 시도합니다.
    ///
    /// # Errors
    ///
    /// - `RemoteError::Auth`: 자격 증명 거부 (다른 전략 시도 안 함)
    /// - `RemoteError::AllStrategiesFailed`: 모든 전략이 실패
    pub async fn acquire(
        &self,
        key: &SourceKey,
        credentials: &SourceCredentials,
    ) -> Result<ConnectionLease<C::Session>, RemoteError> {
        let cached = self.idle.lock().await.remove(key);
        if let Some(idle) = cached {
            if idle.last_used.elapsed() < self.settings.idle_threshold {
                counter!(m::REMOTE_SESSIONS_REUSED_TOTAL).increment(1);
                self.update_gauge().await;
                debug!(source = %key, strategy = %idle.strategy, "reusing pooled session");
                return Ok(self.lease(key, idle.session, idle.strategy, idle.connected_at, true));
            }
            debug!(source = %key, "pooled session idle too long, reconnecting");
            self.close_session(key, idle.session).await;
        }

        let host = format!("{}:{}", credentials.host, credentials.port);
        let preferred = self.preferred.lock().await.get(&host).copied();
        let mut attempts = Vec::new();

        for index in attempt_order(self.strategies.len(), preferred) {
            let strategy = self.strategies[index].clone();
            let connector = Arc::clone(&self.connector);
            let creds = credentials.clone();
            let timeout = self.settings.connect_timeout;
            let attempt = strategy.clone();

            let result = self
                .workers
                .run("connect", timeout, move || {
                    connector.connect(&creds, &attempt, timeout)
                })
                .await;

            match result {
                Ok(session) => {
                    counter!(
                        m::REMOTE_CONNECT_ATTEMPTS_TOTAL,
                        m::LABEL_STRATEGY => strategy.name.clone(),
                        m::LABEL_RESULT => "success"
                    )
                    .increment(1);
                    self.preferred.lock().await.insert(host.clone(), index);
                    info!(
                        source = %key,
                        host = %host,
                        strategy = %strategy.name,
                        fallbacks = attempts.len(),
                        "remote session connected"
                    );
                    return Ok(self.lease(key, session, strategy.name, Instant::now(), false));
                }
                Err(e) => {
                    counter!(
                        m::REMOTE_CONNECT_ATTEMPTS_TOTAL,
                        m::LABEL_STRATEGY => strategy.name.clone(),
                        m::LABEL_RESULT => "failure"
                    )
                    .increment(1);
                    if e.is_auth() {
                        warn!(source = %key, host = %host, error = %e, "authentication rejected");
                        return Err(e);
                    }
                    warn!(
                        source = %key,
                        host = %host,
                        strategy = %strategy.name,
                        error = %e,
                        "connect attempt failed, trying next strategy"
                    );
                    attempts.push(format!("{}: {e}", strategy.name));
                }
            }
        }

        self.preferred.lock().await.invalidate(&host);
        Err(RemoteError::AllStrategiesFailed { host, attempts })
    }

    /// 정상 사용한 임대를 풀에 반납합니다.
    ///
    /// 세션을 잃은 임대(작업 타임아웃 등)는 반납할 세션이 없으므로 퇴출로 처리합니다.
    pub async fn release(&self, mut lease: ConnectionLease<C::Session>) {
        let Some(session) = lease.session.take() else {
            counter!(m::REMOTE_SESSIONS_EVICTED_TOTAL).increment(1);
            debug!(source = %lease.key, "released lease without a session, nothing to pool");
            return;
        };

        let idle = IdleSession {
            session,
            strategy: lease.strategy.clone(),
            connected_at: lease.connected_at,
            last_used: Instant::now(),
        };
        let replaced = self.idle.lock().await.insert(lease.key.clone(), idle);
        if let Some(old) = replaced {
            self.close_session(&lease.key, old.session).await;
        }
        self.update_gauge().await;
    }

    /// 임대를 닫고 폐기합니다. 다음 acquire는 새로 협상합니다.
    pub async fn evict(&self, mut lease: ConnectionLease<C::Session>) {
        counter!(m::REMOTE_SESSIONS_EVICTED_TOTAL).increment(1);
        if let Some(session) = lease.session.take() {
            self.close_session(&lease.key, session).await;
        }
        debug!(source = %lease.key, strategy = %lease.strategy, "lease evicted");
    }

    /// 소스의 유휴 세션을 닫습니다 (소스 삭제/비활성화 시).
    pub async fn evict_source(&self, key: &SourceKey) {
        let removed = self.idle.lock().await.remove(key);
        if let Some(idle) = removed {
            counter!(m::REMOTE_SESSIONS_EVICTED_TOTAL).increment(1);
            self.close_session(key, idle.session).await;
        }
        self.update_gauge().await;
    }

    /// 모든 유휴 세션을 닫습니다.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.idle.lock().await.drain().collect();
        let count = drained.len();
        for (key, idle) in drained {
            self.close_session(&key, idle.session).await;
        }
        gauge!(m::REMOTE_POOLED_SESSIONS).set(0.0);
        info!(closed = count, "session pool closed");
    }

    /// 보관 중인 유휴 세션 수
    pub async fn pooled_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    fn lease(
        &self,
        key: &SourceKey,
        session: C::Session,
        strategy: String,
        connected_at: Instant,
        reused: bool,
    ) -> ConnectionLease<C::Session> {
        ConnectionLease {
            key: key.clone(),
            session: Some(session),
            strategy,
            connected_at,
            reused,
            workers: self.workers.clone(),
            io_timeout: self.settings.io_timeout,
        }
    }

    async fn close_session(&self, key: &SourceKey, session: C::Session) {
        let mut session = session;
        let result = self
            .workers
            .run("close", self.settings.io_timeout, move || {
                session.close();
                Ok(())
            })
            .await;
        if let Err(e) = result {
            debug!(source = %key, error = %e, "session close failed");
        }
    }

    async fn update_gauge(&self) {
        let count = self.idle.lock().await.len();
        gauge!(m::REMOTE_POOLED_SESSIONS).set(count as f64);
    }
}

/// 한 호출자가 독점하는 원격 세션 임대
///
/// [`run`](Self::run)이 세션을 작업자 스레드로 옮겼다가 되돌려 받습니다.
/// 작업이 시간 초과되면 세션은 돌아오지 않으며 임대는 손상 상태가 됩니다.
pub struct ConnectionLease<S> {
    key: SourceKey,
    session: Option<S>,
    strategy: String,
    connected_at: Instant,
    reused: bool,
    workers: WorkerPool,
    io_timeout: Duration,
}

impl<S: RemoteSession> ConnectionLease<S> {
    /// 세션에 대해 블로킹 작업을 실행합니다.
    ///
    /// # Errors
    ///
    /// - `RemoteError::Poisoned`: 이전 작업에서 세션을 잃음
    /// - `RemoteError::Timeout`: `io_timeout` 초과 (이후 임대는 손상 상태)
    pub async fn run<T, F>(&mut self, operation: &'static str, work: F) -> Result<T, RemoteError>
    where
        F: FnOnce(&mut S) -> Result<T, RemoteError> + Send + 'static,
        T: Send + 'static,
    {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| RemoteError::Poisoned(self.key.to_string()))?;

        let (session, result) = self
            .workers
            .run(operation, self.io_timeout, move || {
                let result = work(&mut session);
                Ok((session, result))
            })
            .await?;

        self.session = Some(session);
        result
    }

    /// 소스 키
    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// 협상에 사용한 전략 이름
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// 풀에서 재사용한 세션인지 여부
    pub fn reused(&self) -> bool {
        self.reused
    }

    /// 세션 접속 후 경과 시간
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// 세션을 잃었는지 확인합니다.
    pub fn is_poisoned(&self) -> bool {
        self.session.is_none()
    }
}

impl<S> std::fmt::Debug for ConnectionLease<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("key", &self.key)
            .field("strategy", &self.strategy)
            .field("reused", &self.reused)
            .field("poisoned", &self.session.is_none())
            .finish()
    }
}
