//! 알림 모델 -- 세션 전이와 월드 이벤트에서 파생된 알림
//!
//! 알림 종류마다 소스의 [`DestinationMap`]에서 목적지를 고릅니다. 목적지가
//! 지정되지 않은 종류는 만들지 않습니다.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tailpost_core::types::{DestinationMap, SessionState, SourceKey};
use tokio::time::Instant;
use uuid::Uuid;

use crate::extractor::{EventCategory, FieldValue, RawEvent};
use crate::session::SessionTransition;

/// 알림 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// 플레이어 접속/종료
    PlayerActivity,
    /// 월드 이벤트 (보급품, 이벤트, 사용자 규칙)
    WorldEvents,
    /// 킬 피드
    KillFeed,
}

impl NotificationKind {
    /// 목적지 매핑에서 이 종류의 목적지를 찾습니다.
    pub fn route(self, destinations: &DestinationMap) -> Option<&str> {
        match self {
            Self::PlayerActivity => destinations.player_activity.as_deref(),
            Self::WorldEvents => destinations.world_events.as_deref(),
            Self::KillFeed => destinations.kill_feed.as_deref(),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlayerActivity => f.write_str("player_activity"),
            Self::WorldEvents => f.write_str("world_events"),
            Self::KillFeed => f.write_str("kill_feed"),
        }
    }
}

/// 싱크로 전송되는 본문
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPayload {
    /// 테넌트 ID
    pub tenant_id: String,
    /// 소스 ID
    pub source_id: String,
    /// 알림 종류
    pub kind: NotificationKind,
    /// 원본 이벤트 카테고리
    pub category: EventCategory,
    /// 사람이 읽는 한 줄 요약
    pub title: String,
    /// 발생 시각 (로그 타임스탬프)
    pub occurred_at: DateTime<Utc>,
    /// 이벤트 필드
    pub fields: BTreeMap<String, FieldValue>,
}

/// 목적지와 dedup 키가 정해진 알림 후보
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    /// 알림 종류
    pub kind: NotificationKind,
    /// 중복 억제 키
    pub dedup_key: String,
    /// 본문
    pub payload: NotificationPayload,
}

impl Notice {
    /// 소스 목적지 매핑으로 목적지를 결정합니다.
    pub fn destination<'a>(&self, destinations: &'a DestinationMap) -> Option<&'a str> {
        self.kind.route(destinations)
    }
}

/// 배처 큐에 들어간 알림 작업
#[derive(Debug, Clone)]
pub struct NotificationTask {
    /// 작업 ID
    pub id: Uuid,
    /// 목적지 ID
    pub destination: String,
    /// 본문
    pub payload: NotificationPayload,
    /// 중복 억제 키
    pub dedup_key: String,
    /// 큐 진입 시각
    pub enqueued_at: Instant,
}

/// 세션 전이에서 접속 알림을 만듭니다.
///
/// dedup 키는 (소스, 플레이어, 상태, 전이 시각)입니다. 같은 전이의 재생은 같은
/// 키를 갖고, 쿨다운 안의 재접속은 별개의 알림으로 남습니다.
pub fn presence_notice(source: &SourceKey, transition: &SessionTransition) -> Option<Notice> {
    if !transition.notifies() {
        return None;
    }
    let session = &transition.session;
    let who = session
        .display_name
        .clone()
        .unwrap_or_else(|| session.key.player_key.clone());

    let (category, title) = match session.state {
        SessionState::Online => (EventCategory::PlayerConnectConfirmed, format!("{who} is online")),
        SessionState::Offline => (EventCategory::PlayerDisconnect, format!("{who} went offline")),
        SessionState::Queued => return None,
    };

    let mut fields = BTreeMap::new();
    fields.insert(
        "player".to_owned(),
        FieldValue::Text(session.key.player_key.clone()),
    );
    if let Some(name) = &session.display_name {
        fields.insert("name".to_owned(), FieldValue::Text(name.clone()));
    }

    Some(Notice {
        kind: NotificationKind::PlayerActivity,
        dedup_key: format!(
            "{source}|presence|{}|{}|{}",
            session.key.player_key,
            session.state,
            session.last_transition_at.timestamp_millis()
        ),
        payload: NotificationPayload {
            tenant_id: source.tenant_id.clone(),
            source_id: source.source_id.clone(),
            kind: NotificationKind::PlayerActivity,
            category,
            title,
            occurred_at: session.last_transition_at,
            fields,
        },
    })
}

/// 세션과 무관한 이벤트에서 알림을 만듭니다.
///
/// 같은 사건을 설명하는 반복 라인은 타임스탬프와 필드가 같으므로 같은 dedup
/// 키를 갖습니다. 세션 이벤트와 서버 종료는 `None`입니다.
pub fn event_notice(source: &SourceKey, event: &RawEvent) -> Option<Notice> {
    let (kind, title) = match &event.category {
        EventCategory::PlayerKill => (
            NotificationKind::KillFeed,
            format!(
                "{} killed {} with {}",
                event.text("killer").unwrap_or("?"),
                event.text("victim").unwrap_or("?"),
                event.text("weapon").unwrap_or("?"),
            ),
        ),
        EventCategory::Airdrop => (
            NotificationKind::WorldEvents,
            format!(
                "Airdrop at X={} Y={}",
                event.number("x").unwrap_or_default(),
                event.number("y").unwrap_or_default(),
            ),
        ),
        EventCategory::WorldEvent => (
            NotificationKind::WorldEvents,
            format!(
                "World event started: {}",
                event.text("event").unwrap_or("unknown")
            ),
        ),
        EventCategory::Custom(name) => (NotificationKind::WorldEvents, name.clone()),
        EventCategory::PlayerConnectIntent
        | EventCategory::PlayerConnectConfirmed
        | EventCategory::PlayerDisconnect
        | EventCategory::ServerShutdown => return None,
    };

    let field_part = event
        .fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");

    Some(Notice {
        kind,
        dedup_key: format!(
            "{source}|{}|{}|{field_part}",
            event.category,
            event.timestamp.timestamp_millis()
        ),
        payload: NotificationPayload {
            tenant_id: source.tenant_id.clone(),
            source_id: source.source_id.clone(),
            kind,
            category: event.category.clone(),
            title,
            occurred_at: event.timestamp,
            fields: event.fields.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tailpost_core::types::{PlayerSession, SessionKey};

    fn source() -> SourceKey {
        SourceKey::new("guild-1", "eu-1")
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn transition(state: SessionState, previous: Option<SessionState>) -> SessionTransition {
        SessionTransition {
            session: PlayerSession {
                key: SessionKey::new(source(), "42"),
                display_name: Some("Bo".to_owned()),
                state,
                last_transition_at: ts(),
            },
            previous,
        }
    }

    fn kill() -> RawEvent {
        let mut fields = BTreeMap::new();
        fields.insert("killer".to_owned(), FieldValue::Text("Ann".to_owned()));
        fields.insert("victim".to_owned(), FieldValue::Text("Bo".to_owned()));
        fields.insert("weapon".to_owned(), FieldValue::Text("Bow".to_owned()));
        RawEvent {
            timestamp: ts(),
            category: EventCategory::PlayerKill,
            fields,
        }
    }

    #[test]
    fn online_transition_produces_activity_notice() {
        let notice =
            presence_notice(&source(), &transition(SessionState::Online, Some(SessionState::Queued)))
                .unwrap();
        assert_eq!(notice.kind, NotificationKind::PlayerActivity);
        assert_eq!(notice.payload.title, "Bo is online");
        assert_eq!(
            notice.dedup_key,
            format!("guild-1/eu-1|presence|42|online|{}", ts().timestamp_millis())
        );
    }

    #[test]
    fn reconnect_gets_a_distinct_dedup_key() {
        let first = transition(SessionState::Online, Some(SessionState::Queued));
        let mut again = transition(SessionState::Online, Some(SessionState::Offline));
        again.session.last_transition_at = ts() + chrono::Duration::seconds(90);

        let a = presence_notice(&source(), &first).unwrap();
        let b = presence_notice(&source(), &again).unwrap();
        let replay = presence_notice(&source(), &first).unwrap();
        assert_ne!(a.dedup_key, b.dedup_key);
        assert_eq!(a.dedup_key, replay.dedup_key);
    }

    #[test]
    fn silent_transitions_produce_nothing() {
        assert!(presence_notice(&source(), &transition(SessionState::Queued, None)).is_none());
        assert!(
            presence_notice(
                &source(),
                &transition(SessionState::Offline, Some(SessionState::Queued))
            )
            .is_none()
        );
    }

    #[test]
    fn kill_notice_routes_to_kill_feed() {
        let notice = event_notice(&source(), &kill()).unwrap();
        assert_eq!(notice.kind, NotificationKind::KillFeed);
        assert_eq!(notice.payload.title, "Ann killed Bo with Bow");

        let destinations = DestinationMap {
            player_activity: Some("activity".to_owned()),
            world_events: None,
            kill_feed: Some("kills".to_owned()),
        };
        assert_eq!(notice.destination(&destinations), Some("kills"));
        assert_eq!(NotificationKind::WorldEvents.route(&destinations), None);
    }

    #[test]
    fn repeated_line_yields_same_dedup_key() {
        let a = event_notice(&source(), &kill()).unwrap();
        let b = event_notice(&source(), &kill()).unwrap();
        assert_eq!(a.dedup_key, b.dedup_key);

        let mut later = kill();
        later.timestamp = ts() + chrono::Duration::seconds(1);
        assert_ne!(event_notice(&source(), &later).unwrap().dedup_key, a.dedup_key);
    }

    #[test]
    fn presence_and_shutdown_events_are_not_event_notices() {
        let mut shutdown = kill();
        shutdown.category = EventCategory::ServerShutdown;
        assert!(event_notice(&source(), &shutdown).is_none());

        let mut intent = kill();
        intent.category = EventCategory::PlayerConnectIntent;
        assert!(event_notice(&source(), &intent).is_none());
    }

    #[test]
    fn payload_serializes_with_category_string() {
        let notice = event_notice(&source(), &kill()).unwrap();
        let json = serde_json::to_value(&notice.payload).unwrap();
        assert_eq!(json["kind"], "kill_feed");
        assert_eq!(json["category"], "player_kill");
        assert_eq!(json["fields"]["victim"], "Bo");
        assert_eq!(json["tenant_id"], "guild-1");
    }
}
