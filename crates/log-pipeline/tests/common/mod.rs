//! 통합 테스트 공용 가짜 구현
//!
//! 원격 호스트, 알림 싱크, 운영자 훅, 저장소를 공개 trait만으로 흉내 냅니다.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tailpost_core::collab::{AdminHooks, StaticSourceProvider};
use tailpost_core::config::{DeliveryConfig, TailerConfig};
use tailpost_core::error::StoreError;
use tailpost_core::pipeline::BoxFuture;
use tailpost_core::store::{MemoryStore, StateStore};
use tailpost_core::types::{
    DestinationMap, PlayerSession, SessionKey, SourceConfig, SourceCredentials, SourceCursor,
    SourceKey,
};
use tailpost_log_pipeline::notify::NotificationPayload;
use tailpost_log_pipeline::sink::{NotificationSink, SendOutcome, SinkError};
use tailpost_log_pipeline::{IngestPipeline, IngestPipelineBuilder, PipelineConfig, PipelineConfigBuilder};
use tailpost_remote::{
    RemoteConnector, RemoteDirEntry, RemoteError, RemoteFileStat, RemoteSession,
    TransportStrategy,
};

pub const PATH: &str = "/srv/game/Logs/server.log";

pub type ReadHook = Arc<dyn Fn() + Send + Sync>;

// ─── 원격 호스트 ──────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeHost {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    reject_auth: AtomicBool,
    broken: AtomicBool,
    connects: AtomicUsize,
    on_read: Mutex<Option<ReadHook>>,
}

impl FakeHost {
    pub fn append(&self, content: &str) {
        self.files
            .lock()
            .unwrap()
            .entry(PATH.to_owned())
            .or_default()
            .extend_from_slice(content.as_bytes());
    }

    pub fn replace(&self, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(PATH.to_owned(), content.as_bytes().to_vec());
    }

    pub fn size(&self) -> u64 {
        self.files
            .lock()
            .unwrap()
            .get(PATH)
            .map_or(0, |c| c.len() as u64)
    }

    pub fn reject_auth(&self, reject: bool) {
        self.reject_auth.store(reject, Ordering::SeqCst);
    }

    pub fn break_channel(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// 다음 read_at 호출 때 한 번 실행할 훅을 지정합니다.
    pub fn on_next_read(&self, hook: ReadHook) {
        *self.on_read.lock().unwrap() = Some(hook);
    }
}

pub struct FakeConnector(pub Arc<FakeHost>);

pub struct FakeSession(Arc<FakeHost>);

impl RemoteConnector for FakeConnector {
    type Session = FakeSession;

    fn connect(
        &self,
        credentials: &SourceCredentials,
        _strategy: &TransportStrategy,
        _timeout: Duration,
    ) -> Result<FakeSession, RemoteError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if self.0.reject_auth.load(Ordering::SeqCst) {
            return Err(RemoteError::Auth {
                host: credentials.host.clone(),
                username: credentials.username.clone(),
                reason: "permission denied".to_owned(),
            });
        }
        Ok(FakeSession(Arc::clone(&self.0)))
    }
}

impl FakeSession {
    fn check(&self) -> Result<(), RemoteError> {
        if self.0.broken.load(Ordering::SeqCst) {
            return Err(RemoteError::Protocol("channel closed".to_owned()));
        }
        Ok(())
    }
}

impl RemoteSession for FakeSession {
    fn stat(&mut self, path: &str) -> Result<RemoteFileStat, RemoteError> {
        self.check()?;
        let files = self.0.files.lock().unwrap();
        let content = files
            .get(path)
            .ok_or_else(|| RemoteError::NotFound(path.to_owned()))?;
        Ok(RemoteFileStat {
            size: content.len() as u64,
            mtime: 0,
        })
    }

    fn read_at(&mut self, path: &str, offset: u64, len: u64) -> Result<Bytes, RemoteError> {
        self.check()?;
        let hook = self.0.on_read.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        let files = self.0.files.lock().unwrap();
        let content = files
            .get(path)
            .ok_or_else(|| RemoteError::NotFound(path.to_owned()))?;
        let start = (offset as usize).min(content.len());
        let end = ((offset + len) as usize).min(content.len());
        Ok(Bytes::copy_from_slice(&content[start..end]))
    }

    fn list_dir(&mut self, _dir: &str) -> Result<Vec<RemoteDirEntry>, RemoteError> {
        Ok(Vec::new())
    }

    fn close(&mut self) {}
}

// ─── 알림 싱크 ────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(String, NotificationPayload)>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(String, NotificationPayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.title.clone())
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn send<'a>(
        &'a self,
        destination: &'a str,
        payload: &'a NotificationPayload,
    ) -> BoxFuture<'a, Result<SendOutcome, SinkError>> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_owned(), payload.clone()));
        Box::pin(async { Ok(SendOutcome::Delivered) })
    }
}

// ─── 운영자 훅 ────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingHooks {
    pub auth_failures: AtomicUsize,
    pub disabled: AtomicUsize,
    pub cold_starts: Mutex<Vec<String>>,
    pub failed_stages: Mutex<Vec<String>>,
}

impl AdminHooks for RecordingHooks {
    fn auth_failed(&self, _source: &SourceKey, _reason: &str) {
        self.auth_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn source_disabled(&self, _source: &SourceKey, _reason: &str) {
        self.disabled.fetch_add(1, Ordering::SeqCst);
    }

    fn cold_start(&self, _source: &SourceKey, reason: &str) {
        self.cold_starts.lock().unwrap().push(reason.to_owned());
    }

    fn cycle_failed(&self, _source: &SourceKey, stage: &str, _error: &str) {
        self.failed_stages.lock().unwrap().push(stage.to_owned());
    }
}

// ─── 저장소 ───────────────────────────────────────────────────────

/// 지정한 횟수만큼 커서 저장에 실패하는 저장소
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing_cursor_writes: AtomicUsize,
}

impl FlakyStore {
    pub fn fail_cursor_writes(&self, times: usize) {
        self.failing_cursor_writes.store(times, Ordering::SeqCst);
    }
}

impl StateStore for FlakyStore {
    fn get_cursor<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Option<SourceCursor>, StoreError>> {
        self.inner.get_cursor(key)
    }

    fn put_cursor(&self, cursor: SourceCursor) -> BoxFuture<'_, Result<(), StoreError>> {
        let failing = self
            .failing_cursor_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Box::pin(async { Err(StoreError::Backend("disk full".to_owned())) });
        }
        self.inner.put_cursor(cursor)
    }

    fn delete_cursor<'a>(&'a self, key: &'a SourceKey) -> BoxFuture<'a, Result<(), StoreError>> {
        self.inner.delete_cursor(key)
    }

    fn get_session<'a>(
        &'a self,
        key: &'a SessionKey,
    ) -> BoxFuture<'a, Result<Option<PlayerSession>, StoreError>> {
        self.inner.get_session(key)
    }

    fn upsert_session(&self, session: PlayerSession) -> BoxFuture<'_, Result<(), StoreError>> {
        self.inner.upsert_session(session)
    }

    fn sessions_for_source<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Vec<PlayerSession>, StoreError>> {
        self.inner.sessions_for_source(key)
    }
}

// ─── 조립 ─────────────────────────────────────────────────────────

pub fn key() -> SourceKey {
    SourceKey::new("guild-9", "arena")
}

pub fn source_config() -> SourceConfig {
    SourceConfig {
        tenant_id: "guild-9".to_owned(),
        source_id: "arena".to_owned(),
        host: "192.0.2.7".to_owned(),
        port: 2222,
        username: "logs".to_owned(),
        password: Some("pw".to_owned()),
        private_key_path: None,
        passphrase: None,
        remote_path: PATH.to_owned(),
        enabled: true,
        destinations: DestinationMap {
            player_activity: Some("activity".to_owned()),
            world_events: None,
            kill_feed: Some("kills".to_owned()),
        },
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfigBuilder::new()
        .poll_interval_secs(3600)
        .shutdown_grace_secs(2)
        .tailer(TailerConfig {
            max_read_bytes: 64 * 1024,
            fingerprint_bytes: 64,
        })
        .delivery(DeliveryConfig {
            inter_message_delay_ms: 0,
            drain_interval_ms: 50,
            flush_deadline_secs: 2,
            ..DeliveryConfig::default()
        })
        .build()
        .unwrap()
}

pub struct Harness {
    pub host: Arc<FakeHost>,
    pub sink: Arc<RecordingSink>,
    pub hooks: Arc<RecordingHooks>,
    pub store: Arc<FlakyStore>,
    pub provider: Arc<StaticSourceProvider>,
    pub pipeline: IngestPipeline<FakeConnector>,
}

pub fn harness() -> Harness {
    let host = Arc::new(FakeHost::default());
    let sink = Arc::new(RecordingSink::default());
    let hooks = Arc::new(RecordingHooks::default());
    let store = Arc::new(FlakyStore::default());
    let provider = Arc::new(StaticSourceProvider::new(vec![source_config()]));

    let pipeline = IngestPipelineBuilder::new(Arc::new(FakeConnector(Arc::clone(&host))))
        .config(test_config())
        .store(store.clone())
        .sink(sink.clone())
        .source_provider(provider.clone())
        .admin_hooks(hooks.clone())
        .build()
        .unwrap();

    Harness {
        host,
        sink,
        hooks,
        store,
        provider,
        pipeline,
    }
}

/// `[2024.03.01-10.MM.SS:000][  1]` 접두어를 붙인 한 줄 (개행 포함)
pub fn line(minute: u32, second: u32, message: &str) -> String {
    format!("[2024.03.01-10.{minute:02}.{second:02}:000][  1]{message}\n")
}
