//! 추출된 이벤트 타입

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 이벤트 카테고리
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// 접속 요청 (대기열 진입)
    PlayerConnectIntent,
    /// 접속 완료
    PlayerConnectConfirmed,
    /// 접속 종료
    PlayerDisconnect,
    /// 킬
    PlayerKill,
    /// 보급품 투하
    Airdrop,
    /// 월드 이벤트 시작
    WorldEvent,
    /// 서버 종료
    ServerShutdown,
    /// YAML 규칙으로 정의된 카테고리
    Custom(String),
}

impl EventCategory {
    /// 세션 상태에 영향을 주는 카테고리인지 확인합니다.
    pub fn is_presence(&self) -> bool {
        matches!(
            self,
            Self::PlayerConnectIntent | Self::PlayerConnectConfirmed | Self::PlayerDisconnect
        )
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlayerConnectIntent => f.write_str("player_connect_intent"),
            Self::PlayerConnectConfirmed => f.write_str("player_connect_confirmed"),
            Self::PlayerDisconnect => f.write_str("player_disconnect"),
            Self::PlayerKill => f.write_str("player_kill"),
            Self::Airdrop => f.write_str("airdrop"),
            Self::WorldEvent => f.write_str("world_event"),
            Self::ServerShutdown => f.write_str("server_shutdown"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

impl Serialize for EventCategory {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 필드 값
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 문자열
    Text(String),
    /// 숫자
    Number(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// 한 라인에서 추출된 불변 이벤트
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEvent {
    /// 라인 접두어의 타임스탬프
    pub timestamp: DateTime<Utc>,
    /// 카테고리
    pub category: EventCategory,
    /// 캡처된 필드
    pub fields: BTreeMap<String, FieldValue>,
}

impl RawEvent {
    /// 문자열 필드를 조회합니다.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// 숫자 필드를 조회합니다.
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.fields.get(name) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// 플레이어 식별자 (`player` 필드)
    pub fn player_key(&self) -> Option<&str> {
        self.text("player")
    }
}
