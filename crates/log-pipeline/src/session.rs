//! 플레이어 세션 상태 기계
//!
//! ```text
//!            confirmed             disconnect
//!  queued ──────────────► online ─────────────► offline
//!     │                                            ▲
//!     └────────────────── disconnect ──────────────┘
//! ```
//!
//! - 추적하지 않던 키는 접속 요청이면 `queued`로 만듭니다. 접속 완료/종료 이벤트도
//!   버리지 않고 그 상태로 바로 기록합니다 (요청 라인은 로테이션으로 잃을 수 있음).
//! - `offline` 이후의 새 접속 요청/완료는 같은 키의 새 세션으로 다시 엽니다.
//! - 저장된 `last_transition_at`보다 오래된 이벤트는 무시합니다. 같은 상태로의
//!   전이는 쓰지 않으므로 같은 이벤트를 두 번 적용해도 결과가 같습니다.
//! - 알림은 `online` 진입과 `online → offline`에서만 발생합니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tailpost_core::error::StoreError;
use tailpost_core::metrics as m;
use tailpost_core::store::StateStore;
use tailpost_core::types::{PlayerSession, SessionKey, SessionState, SourceKey};
use tracing::debug;

use crate::extractor::{EventCategory, RawEvent};

/// 적용된 상태 전이
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTransition {
    /// 전이 후 세션
    pub session: PlayerSession,
    /// 전이 전 상태 (새로 만든 세션이면 `None`)
    pub previous: Option<SessionState>,
}

impl SessionTransition {
    /// 알림 대상 전이인지 확인합니다.
    pub fn notifies(&self) -> bool {
        match self.session.state {
            SessionState::Online => true,
            SessionState::Offline => self.previous == Some(SessionState::Online),
            SessionState::Queued => false,
        }
    }
}

/// 이벤트 적용 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 세션 이벤트가 아니거나 플레이어 키가 없음
    NotApplicable,
    /// 이미 반영된 이벤트 (같은 상태)
    Unchanged,
    /// 저장된 전이보다 오래된 이벤트
    Stale,
    /// 전이가 저장됨
    Transition(SessionTransition),
}

/// 세션 상태 기계
///
/// 상태는 모두 저장소에 있으며 이 타입은 전이 규칙만 가집니다.
/// 한 소스의 사이클은 직렬화되므로 같은 키에 대한 쓰기는 하나뿐입니다.
#[derive(Clone)]
pub struct SessionMachine {
    store: Arc<dyn StateStore>,
}

impl SessionMachine {
    /// 새 상태 기계를 생성합니다.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// 이벤트를 세션에 적용합니다.
    pub async fn apply(
        &self,
        source: &SourceKey,
        event: &RawEvent,
    ) -> Result<ApplyOutcome, StoreError> {
        if !event.category.is_presence() {
            return Ok(ApplyOutcome::NotApplicable);
        }
        let Some(player) = event.player_key() else {
            debug!(source = %source, category = %event.category, "presence event without player key");
            return Ok(ApplyOutcome::NotApplicable);
        };

        let key = SessionKey::new(source.clone(), player);
        let existing = self.store.get_session(&key).await?;

        let next = match next_state(&event.category, existing.as_ref(), event.timestamp) {
            Decision::Move(state) => state,
            Decision::Stay => return Ok(ApplyOutcome::Unchanged),
            Decision::Stale => {
                counter!(m::SESSIONS_STALE_EVENTS_TOTAL, m::LABEL_SOURCE => source.to_string())
                    .increment(1);
                debug!(session = %key, category = %event.category, "ignoring out-of-order event");
                return Ok(ApplyOutcome::Stale);
            }
        };

        let previous = existing.as_ref().map(|s| s.state);
        let display_name = event
            .text("name")
            .map(str::to_owned)
            .or_else(|| existing.and_then(|s| s.display_name));

        let session = PlayerSession {
            key,
            display_name,
            state: next,
            last_transition_at: event.timestamp,
        };
        self.store.upsert_session(session.clone()).await?;

        counter!(m::SESSIONS_TRANSITIONS_TOTAL, "to" => next.to_string()).increment(1);
        debug!(
            session = %session.key,
            from = ?previous,
            to = %next,
            "session transition"
        );

        Ok(ApplyOutcome::Transition(SessionTransition { session, previous }))
    }

    /// 서버 종료 이벤트 시각 `at`으로 소스의 열린 세션을 모두 `offline`으로 정리합니다.
    ///
    /// 전이 시각은 `at`과 저장된 시각 중 늦은 쪽입니다. 알림은 만들지 않으며
    /// 정리한 세션 수를 반환합니다.
    pub async fn reconcile_offline(
        &self,
        source: &SourceKey,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.close_open(source, Some(at)).await
    }

    /// 콜드 스타트에서 열린 세션을 `offline`으로 닫습니다.
    ///
    /// 로그 시계와 벽시계는 다를 수 있으므로 저장된 전이 시각을 그대로 둡니다.
    pub async fn close_open_sessions(&self, source: &SourceKey) -> Result<usize, StoreError> {
        self.close_open(source, None).await
    }

    async fn close_open(
        &self,
        source: &SourceKey,
        at: Option<DateTime<Utc>>,
    ) -> Result<usize, StoreError> {
        let sessions = self.store.sessions_for_source(source).await?;
        let mut closed = 0;

        for mut session in sessions.into_iter().filter(|s| s.state.is_open()) {
            session.state = SessionState::Offline;
            if let Some(at) = at {
                session.last_transition_at = session.last_transition_at.max(at);
            }
            self.store.upsert_session(session).await?;
            closed += 1;
        }

        if closed > 0 {
            counter!(m::SESSIONS_RECONCILED_TOTAL, m::LABEL_SOURCE => source.to_string())
                .increment(closed as u64);
            debug!(source = %source, closed, "reconciled open sessions offline");
        }
        Ok(closed)
    }
}

enum Decision {
    Move(SessionState),
    Stay,
    Stale,
}

fn next_state(
    category: &EventCategory,
    existing: Option<&PlayerSession>,
    at: DateTime<Utc>,
) -> Decision {
    use SessionState::{Offline, Online, Queued};

    let Some(current) = existing else {
        return match category {
            EventCategory::PlayerConnectIntent => Decision::Move(Queued),
            EventCategory::PlayerConnectConfirmed => Decision::Move(Online),
            EventCategory::PlayerDisconnect => Decision::Move(Offline),
            _ => Decision::Stay,
        };
    };

    let last = current.last_transition_at;
    if at < last {
        return Decision::Stale;
    }

    match (category, current.state) {
        // reopening needs a strictly newer event than the disconnect
        (EventCategory::PlayerConnectIntent, Offline) if at > last => Decision::Move(Queued),
        (EventCategory::PlayerConnectConfirmed, Queued) => Decision::Move(Online),
        (EventCategory::PlayerConnectConfirmed, Offline) if at > last => Decision::Move(Online),
        (EventCategory::PlayerDisconnect, Queued | Online) => Decision::Move(Offline),
        _ => Decision::Stay,
    }
}
