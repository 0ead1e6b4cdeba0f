//! 알림 전달 배처 / 속도 제한기
//!
//! - 목적지별 FIFO 큐. 쿨다운 안에 같은 dedup 키가 다시 들어오면 조용히 버립니다.
//! - 드레인은 목적지당 `batch_size`건씩, 메시지 사이에 `inter_message_delay`를 둡니다.
//! - 전역 분당 전송 한도를 60초 슬라이딩 윈도우로 적용합니다. 한도에 닿으면
//!   남은 작업은 다음 사이클로 미룹니다 (버리지 않음).
//! - 싱크가 속도 제한을 알리면 그 목적지는 이번 사이클 동안 멈추고 다음
//!   사이클에 재개합니다. `Retry-After`가 있으면 그 시각까지 건너뜁니다.
//! - `task_ttl`보다 오래 기다린 작업은 만료되어 폐기됩니다.
//! - 종료 시 [`DeliveryBatcher::flush_all`]은 배치 크기를 무시하고 전체 마감
//!   시각 안에서 모든 큐를 비웁니다.
//!
//! 드레인 패스는 내부 잠금으로 직렬화되며, 싱크 호출 중에는 큐 잠금을 쥐지
//! 않으므로 드레인 도중에도 `enqueue`는 막히지 않습니다.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tailpost_core::cache::TtlCache;
use tailpost_core::config::DeliveryConfig;
use tailpost_core::metrics as m;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notify::{NotificationPayload, NotificationTask};
use crate::sink::{NotificationSink, SendOutcome, SinkError};

const RATE_WINDOW: Duration = Duration::from_secs(60);
const COOLDOWN_PURGE_THRESHOLD: usize = 4096;

/// 배처 동작 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherSettings {
    /// dedup 키 쿨다운
    pub cooldown: Duration,
    /// 목적지당 사이클 배치 크기
    pub batch_size: usize,
    /// 메시지 간 지연
    pub inter_message_delay: Duration,
    /// 전역 분당 전송 한도
    pub per_minute_cap: usize,
    /// 드레인 주기
    pub drain_interval: Duration,
    /// 큐 대기 최대 시간
    pub task_ttl: Duration,
    /// 싱크 호출 타임아웃
    pub send_timeout: Duration,
}

impl BatcherSettings {
    /// `[delivery]` 설정에서 생성합니다.
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            cooldown: Duration::from_secs(config.cooldown_secs),
            batch_size: config.batch_size.max(1),
            inter_message_delay: Duration::from_millis(config.inter_message_delay_ms),
            per_minute_cap: (config.per_minute_cap as usize).max(1),
            drain_interval: Duration::from_millis(config.drain_interval_ms.max(1)),
            task_ttl: Duration::from_secs(config.task_ttl_secs),
            send_timeout: Duration::from_secs(config.send_timeout_secs.max(1)),
        }
    }
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

/// `enqueue` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// 큐에 들어감
    Queued,
    /// 쿨다운 안의 중복으로 버려짐
    Duplicate,
}

/// 드레인 패스 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// 전달된 알림 수
    pub sent: usize,
    /// 속도 제한으로 멈춘 목적지
    pub throttled: Vec<String>,
    /// 재시도 가능한 실패 수 (작업 유지)
    pub failed: usize,
    /// 싱크가 거부하여 폐기된 수
    pub rejected: usize,
    /// 만료로 폐기된 수
    pub expired: usize,
    /// 분당 한도에 닿았는지
    pub capped: bool,
    /// 패스 후 남은 작업 수
    pub remaining: usize,
}

impl DrainReport {
    fn merge(&mut self, pass: DrainReport) {
        self.sent += pass.sent;
        self.failed += pass.failed;
        self.rejected += pass.rejected;
        self.expired += pass.expired;
        self.capped |= pass.capped;
        self.remaining = pass.remaining;
        for destination in pass.throttled {
            if !self.throttled.contains(&destination) {
                self.throttled.push(destination);
            }
        }
    }

    fn progressed(&self) -> bool {
        self.sent + self.rejected + self.expired > 0
    }
}

struct BatcherState {
    queues: BTreeMap<String, VecDeque<NotificationTask>>,
    cooldown: TtlCache<String, ()>,
    window: VecDeque<Instant>,
    paused_until: HashMap<String, Instant>,
}

impl BatcherState {
    fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    fn prune_window(&mut self, now: Instant) {
        while let Some(oldest) = self.window.front() {
            if now.duration_since(*oldest) >= RATE_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_paused(&mut self, destination: &str, now: Instant) -> bool {
        match self.paused_until.get(destination) {
            Some(until) if *until > now => true,
            Some(_) => {
                self.paused_until.remove(destination);
                false
            }
            None => false,
        }
    }

    fn expire(&mut self, ttl: Duration, now: Instant) -> usize {
        let mut expired = 0;
        for (destination, queue) in &mut self.queues {
            let before = queue.len();
            queue.retain(|task| now.duration_since(task.enqueued_at) < ttl);
            let dropped = before - queue.len();
            if dropped > 0 {
                warn!(destination = %destination, dropped, "notifications expired before delivery");
                expired += dropped;
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        expired
    }

    /// 윈도우나 일시 정지가 풀리는 가장 이른 시각
    fn next_wakeup(&self, cap: usize, now: Instant) -> Option<Instant> {
        let window_free = (self.window.len() >= cap)
            .then(|| self.window.front().map(|oldest| *oldest + RATE_WINDOW))
            .flatten();
        let pause_end = self
            .paused_until
            .values()
            .filter(|until| **until > now)
            .min()
            .copied();
        match (window_free, pause_end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// 목적지별 알림 큐와 드레인 루프
pub struct DeliveryBatcher {
    sink: Arc<dyn NotificationSink>,
    settings: BatcherSettings,
    state: Mutex<BatcherState>,
    drain_lock: Mutex<()>,
}

impl DeliveryBatcher {
    /// 새 배처를 생성합니다.
    pub fn new(sink: Arc<dyn NotificationSink>, settings: BatcherSettings) -> Self {
        Self {
            sink,
            settings,
            state: Mutex::new(BatcherState {
                queues: BTreeMap::new(),
                cooldown: TtlCache::new(settings.cooldown),
                window: VecDeque::new(),
                paused_until: HashMap::new(),
            }),
            drain_lock: Mutex::new(()),
        }
    }

    /// 적용 중인 설정
    pub fn settings(&self) -> BatcherSettings {
        self.settings
    }

    /// 알림을 큐에 넣습니다.
    ///
    /// 같은 dedup 키가 쿨다운 안에 이미 들어왔으면 버립니다.
    pub async fn enqueue(
        &self,
        destination: impl Into<String>,
        payload: NotificationPayload,
        dedup_key: impl Into<String>,
    ) -> EnqueueResult {
        let destination = destination.into();
        let dedup_key = dedup_key.into();
        let mut state = self.state.lock().await;

        if !state.cooldown.insert_if_absent(dedup_key.clone(), ()) {
            counter!(m::DELIVERY_DEDUPLICATED_TOTAL).increment(1);
            debug!(destination = %destination, dedup_key = %dedup_key, "duplicate notification suppressed");
            return EnqueueResult::Duplicate;
        }
        if state.cooldown.len() > COOLDOWN_PURGE_THRESHOLD {
            state.cooldown.purge_expired();
        }

        let task = NotificationTask {
            id: Uuid::new_v4(),
            destination: destination.clone(),
            payload,
            dedup_key,
            enqueued_at: Instant::now(),
        };
        state.queues.entry(destination).or_default().push_back(task);

        counter!(m::DELIVERY_ENQUEUED_TOTAL).increment(1);
        gauge!(m::DELIVERY_QUEUE_DEPTH).set(state.pending() as f64);
        EnqueueResult::Queued
    }

    /// 대기 중인 전체 작업 수
    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending()
    }

    /// 목적지의 대기 작업 수
    pub async fn pending_for(&self, destination: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(destination)
            .map_or(0, VecDeque::len)
    }

    /// 드레인 사이클 한 번을 수행합니다.
    pub async fn drain_once(&self) -> DrainReport {
        self.drain_pass(self.settings.batch_size, None).await
    }

    /// 취소될 때까지 `drain_interval`마다 드레인합니다.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.drain_once().await;
                    if report.sent > 0 || !report.throttled.is_empty() || report.failed > 0 {
                        debug!(
                            sent = report.sent,
                            failed = report.failed,
                            throttled = report.throttled.len(),
                            remaining = report.remaining,
                            "delivery drain cycle"
                        );
                    }
                }
            }
        }
        debug!("delivery drain loop stopped");
    }

    /// 모든 큐를 비웁니다 (종료 경로).
    ///
    /// 배치 크기는 무시하지만 메시지 간 지연, 분당 한도, 속도 제한은 지킵니다.
    /// `deadline`이 지나면 남은 작업을 두고 반환합니다.
    pub async fn flush_all(&self, deadline: Duration) -> DrainReport {
        let until = Instant::now() + deadline;
        let mut total = DrainReport::default();

        loop {
            let pass = self.drain_pass(usize::MAX, Some(until)).await;
            let progressed = pass.progressed();
            total.merge(pass);

            let now = Instant::now();
            if total.remaining == 0 || now >= until {
                break;
            }
            if !progressed {
                let wake = {
                    let state = self.state.lock().await;
                    state.next_wakeup(self.settings.per_minute_cap, now)
                }
                .unwrap_or(now + self.settings.drain_interval);
                tokio::time::sleep_until(wake.min(until)).await;
            }
        }

        if total.remaining > 0 {
            warn!(remaining = total.remaining, sent = total.sent, "flush deadline reached with undelivered notifications");
        } else {
            info!(sent = total.sent, "notification queues flushed");
        }
        total
    }

    async fn drain_pass(&self, per_destination: usize, deadline: Option<Instant>) -> DrainReport {
        let _serial = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        let destinations: Vec<String> = {
            let mut state = self.state.lock().await;
            let expired = state.expire(self.settings.task_ttl, Instant::now());
            if expired > 0 {
                counter!(m::DELIVERY_DROPPED_TOTAL, "reason" => "expired").increment(expired as u64);
                report.expired = expired;
            }
            state.queues.keys().cloned().collect()
        };

        let mut first_send = true;
        'destinations: for destination in destinations {
            let mut attempts = 0;
            while attempts < per_destination {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    break 'destinations;
                }

                let task = {
                    let mut state = self.state.lock().await;
                    let now = Instant::now();
                    if state.is_paused(&destination, now) {
                        break;
                    }
                    state.prune_window(now);
                    if state.window.len() >= self.settings.per_minute_cap {
                        report.capped = true;
                        break 'destinations;
                    }
                    match state.queues.get_mut(&destination).and_then(VecDeque::pop_front) {
                        Some(task) => task,
                        None => break,
                    }
                };

                if !first_send && !self.settings.inter_message_delay.is_zero() {
                    tokio::time::sleep(self.settings.inter_message_delay).await;
                }
                first_send = false;
                attempts += 1;

                self.state.lock().await.window.push_back(Instant::now());
                let result = match tokio::time::timeout(
                    self.settings.send_timeout,
                    self.sink.send(&task.destination, &task.payload),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout),
                };

                match result {
                    Ok(SendOutcome::Delivered) => {
                        counter!(m::DELIVERY_SENT_TOTAL).increment(1);
                        report.sent += 1;
                    }
                    Ok(SendOutcome::Throttled { retry_after }) => {
                        warn!(
                            destination = %destination,
                            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                            "sink throttled destination, pausing for this cycle"
                        );
                        self.requeue(task, retry_after).await;
                        report.throttled.push(destination.clone());
                        break;
                    }
                    Err(e) if e.is_retryable() => {
                        counter!(m::DELIVERY_FAILED_TOTAL).increment(1);
                        warn!(destination = %destination, error = %e, "notification delivery failed, will retry");
                        self.requeue(task, None).await;
                        report.failed += 1;
                        break;
                    }
                    Err(e) => {
                        counter!(m::DELIVERY_DROPPED_TOTAL, "reason" => "rejected").increment(1);
                        warn!(
                            destination = %destination,
                            dedup_key = %task.dedup_key,
                            error = %e,
                            "notification rejected by sink, dropping"
                        );
                        report.rejected += 1;
                    }
                }
            }
        }

        let state = self.state.lock().await;
        report.remaining = state.pending();
        gauge!(m::DELIVERY_QUEUE_DEPTH).set(report.remaining as f64);
        report
    }

    /// 작업을 큐 앞에 되돌리고 목적지를 잠시 멈춥니다.
    async fn requeue(&self, task: NotificationTask, retry_after: Option<Duration>) {
        let mut state = self.state.lock().await;
        let pause = retry_after.unwrap_or(self.settings.drain_interval);
        state
            .paused_until
            .insert(task.destination.clone(), Instant::now() + pause);
        state
            .queues
            .entry(task.destination.clone())
            .or_default()
            .push_front(task);
    }
}
