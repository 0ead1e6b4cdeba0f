//! 영속 저장소 -- 소스 커서와 플레이어 세션 보관
//!
//! [`StateStore`]는 dyn 호환 trait이며 파이프라인은 `Arc<dyn StateStore>`로
//! 저장소를 공유합니다. 제공 구현:
//!
//! - [`MemoryStore`]: 프로세스 메모리 (테스트, `store.backend = "memory"`)
//! - [`JsonFileStore`]: 단일 JSON 파일 (임시 파일 + rename으로 원자적 교체)
//! - [`TimeoutStore`]: 모든 호출에 상한 시간을 적용하는 래퍼
//!
//! 세션 upsert는 `last_transition_at`을 뒤로 돌리지 않습니다. 더 오래된
//! 시각의 레코드는 조용히 무시됩니다.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::StoreError;
use crate::pipeline::BoxFuture;
use crate::types::{PlayerSession, SessionKey, SourceCursor, SourceKey};

/// 커서/세션 영속 저장소 인터페이스
pub trait StateStore: Send + Sync {
    /// 소스 커서를 조회합니다.
    fn get_cursor<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Option<SourceCursor>, StoreError>>;

    /// 소스 커서를 저장합니다.
    fn put_cursor(&self, cursor: SourceCursor) -> BoxFuture<'_, Result<(), StoreError>>;

    /// 소스 커서를 삭제합니다. 없으면 아무것도 하지 않습니다.
    fn delete_cursor<'a>(&'a self, key: &'a SourceKey) -> BoxFuture<'a, Result<(), StoreError>>;

    /// 플레이어 세션을 조회합니다.
    fn get_session<'a>(
        &'a self,
        key: &'a SessionKey,
    ) -> BoxFuture<'a, Result<Option<PlayerSession>, StoreError>>;

    /// 플레이어 세션을 저장합니다.
    fn upsert_session(&self, session: PlayerSession) -> BoxFuture<'_, Result<(), StoreError>>;

    /// 소스에 속한 모든 세션을 조회합니다.
    fn sessions_for_source<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Vec<PlayerSession>, StoreError>>;
}

// ─── 공유 상태 ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StoreState {
    cursors: BTreeMap<SourceKey, SourceCursor>,
    sessions: BTreeMap<SessionKey, PlayerSession>,
}

impl StoreState {
    /// 단조성 검사 후 세션을 반영합니다. 반영했으면 `true`.
    fn upsert_session(&mut self, session: PlayerSession) -> bool {
        if let Some(existing) = self.sessions.get(&session.key)
            && existing.last_transition_at > session.last_transition_at
        {
            debug!(
                session = %session.key,
                "ignoring session write older than stored transition"
            );
            return false;
        }
        self.sessions.insert(session.key.clone(), session);
        true
    }

    fn sessions_for_source(&self, key: &SourceKey) -> Vec<PlayerSession> {
        self.sessions
            .values()
            .filter(|s| &s.key.source == key)
            .cloned()
            .collect()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            cursors: self.cursors.values().cloned().collect(),
            sessions: self.sessions.values().cloned().collect(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            cursors: snapshot
                .cursors
                .into_iter()
                .map(|c| (c.key.clone(), c))
                .collect(),
            sessions: snapshot
                .sessions
                .into_iter()
                .map(|s| (s.key.clone(), s))
                .collect(),
        }
    }
}

/// 디스크 직렬화 형식
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    cursors: Vec<SourceCursor>,
    #[serde(default)]
    sessions: Vec<PlayerSession>,
}

// ─── MemoryStore ──────────────────────────────────────────────────

/// 메모리 저장소
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get_cursor<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Option<SourceCursor>, StoreError>> {
        Box::pin(async move { Ok(self.state.read().await.cursors.get(key).cloned()) })
    }

    fn put_cursor(&self, cursor: SourceCursor) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.state
                .write()
                .await
                .cursors
                .insert(cursor.key.clone(), cursor);
            Ok(())
        })
    }

    fn delete_cursor<'a>(&'a self, key: &'a SourceKey) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.state.write().await.cursors.remove(key);
            Ok(())
        })
    }

    fn get_session<'a>(
        &'a self,
        key: &'a SessionKey,
    ) -> BoxFuture<'a, Result<Option<PlayerSession>, StoreError>> {
        Box::pin(async move { Ok(self.state.read().await.sessions.get(key).cloned()) })
    }

    fn upsert_session(&self, session: PlayerSession) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.state.write().await.upsert_session(session);
            Ok(())
        })
    }

    fn sessions_for_source<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Vec<PlayerSession>, StoreError>> {
        Box::pin(async move { Ok(self.state.read().await.sessions_for_source(key)) })
    }
}

// ─── JsonFileStore ────────────────────────────────────────────────

/// JSON 파일 저장소
///
/// 모든 변경은 메모리에 반영한 뒤 전체 스냅샷을 `<path>.tmp`에 쓰고
/// `rename`으로 교체합니다. 쓰기 실패 시 메모리 상태는 이미 변경된 채로
/// 남으며 다음 성공한 쓰기에서 함께 기록됩니다.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// 파일에서 상태를 로드합니다. 파일이 없으면 빈 상태로 시작합니다.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                debug!(
                    path = %path.display(),
                    cursors = snapshot.cursors.len(),
                    sessions = snapshot.sessions.len(),
                    "loaded state file"
                );
                StoreState::from_snapshot(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => {
                return Err(StoreError::Backend(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// 저장 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&state.snapshot())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(format!("failed to create dir: {e}")))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            StoreError::Backend(format!("failed to replace {}: {e}", self.path.display()))
        })
    }
}

impl StateStore for JsonFileStore {
    fn get_cursor<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Option<SourceCursor>, StoreError>> {
        Box::pin(async move { Ok(self.state.lock().await.cursors.get(key).cloned()) })
    }

    fn put_cursor(&self, cursor: SourceCursor) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.cursors.insert(cursor.key.clone(), cursor);
            self.persist(&state).await
        })
    }

    fn delete_cursor<'a>(&'a self, key: &'a SourceKey) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.cursors.remove(key).is_some() {
                self.persist(&state).await?;
            }
            Ok(())
        })
    }

    fn get_session<'a>(
        &'a self,
        key: &'a SessionKey,
    ) -> BoxFuture<'a, Result<Option<PlayerSession>, StoreError>> {
        Box::pin(async move { Ok(self.state.lock().await.sessions.get(key).cloned()) })
    }

    fn upsert_session(&self, session: PlayerSession) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.upsert_session(session) {
                self.persist(&state).await?;
            }
            Ok(())
        })
    }

    fn sessions_for_source<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Vec<PlayerSession>, StoreError>> {
        Box::pin(async move { Ok(self.state.lock().await.sessions_for_source(key)) })
    }
}

// ─── TimeoutStore ─────────────────────────────────────────────────

/// future에 상한 시간을 적용합니다.
///
/// 시간 초과 시 [`StoreError::Timeout`]을 반환합니다.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { operation, after }),
    }
}

/// 모든 호출에 타임아웃을 적용하는 저장소 래퍼
#[derive(Clone)]
pub struct TimeoutStore {
    inner: Arc<dyn StateStore>,
    timeout: Duration,
}

impl TimeoutStore {
    /// 저장소를 감쌉니다.
    pub fn new(inner: Arc<dyn StateStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// 적용 중인 타임아웃
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for TimeoutStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StateStore for TimeoutStore {
    fn get_cursor<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Option<SourceCursor>, StoreError>> {
        Box::pin(with_timeout(
            "get_cursor",
            self.timeout,
            self.inner.get_cursor(key),
        ))
    }

    fn put_cursor(&self, cursor: SourceCursor) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(with_timeout(
            "put_cursor",
            self.timeout,
            self.inner.put_cursor(cursor),
        ))
    }

    fn delete_cursor<'a>(&'a self, key: &'a SourceKey) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(with_timeout(
            "delete_cursor",
            self.timeout,
            self.inner.delete_cursor(key),
        ))
    }

    fn get_session<'a>(
        &'a self,
        key: &'a SessionKey,
    ) -> BoxFuture<'a, Result<Option<PlayerSession>, StoreError>> {
        Box::pin(with_timeout(
            "get_session",
            self.timeout,
            self.inner.get_session(key),
        ))
    }

    fn upsert_session(&self, session: PlayerSession) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(with_timeout(
            "upsert_session",
            self.timeout,
            self.inner.upsert_session(session),
        ))
    }

    fn sessions_for_source<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> BoxFuture<'a, Result<Vec<PlayerSession>, StoreError>> {
        Box::pin(with_timeout(
            "sessions_for_source",
            self.timeout,
            self.inner.sessions_for_source(key),
        ))
    }
}
