//! 도메인 타입 -- 시스템 전역에서 사용되는 공통 타입
//!
//! 소스 식별자, 커서, 플레이어 세션, 소스 설정 등 모든 크레이트가
//! 공유하는 데이터 구조를 정의합니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// (tenant, source) 복합 키
///
/// 하나의 원격 게임 서버 로그 파일을 식별합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    /// 테넌트 ID
    pub tenant_id: String,
    /// 테넌트 내 소스 ID
    pub source_id: String,
}

impl SourceKey {
    /// 새 소스 키를 생성합니다.
    pub fn new(tenant_id: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.source_id)
    }
}

/// 커서 읽기 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    /// 기준선 설정 읽기 (과거 내용 건너뜀)
    Cold,
    /// 저장된 오프셋부터 증분 읽기
    Hot,
}

impl fmt::Display for CursorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cold => write!(f, "cold"),
            Self::Hot => write!(f, "hot"),
        }
    }
}

/// 소스 지문 -- 로테이션/재작성 감지에 사용
///
/// 파일 앞부분 `head_len` 바이트의 FNV-1a 해시입니다.
/// 파일이 뒤에 덧붙여지는 동안에는 변하지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceFingerprint {
    /// 해시에 포함된 선두 바이트 수
    pub head_len: u64,
    /// 선두 바이트의 FNV-1a 64 해시
    pub head_hash: u64,
}

impl SourceFingerprint {
    /// 주어진 선두 바이트로 지문을 계산합니다.
    pub fn of_head(head: &[u8]) -> Self {
        Self {
            head_len: head.len() as u64,
            head_hash: fnv1a64(head),
        }
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

/// 소스 커서 -- (tenant, source) 별 읽기 위치
///
/// 지문이 같은 동안 `offset`은 감소하지 않습니다.
/// 지문이 바뀌면 새 기준선을 잡습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCursor {
    /// 소스 키
    pub key: SourceKey,
    /// 소비한 바이트 수
    pub offset: u64,
    /// 소스 지문
    pub fingerprint: SourceFingerprint,
    /// 마지막 읽기 모드
    pub mode: CursorMode,
    /// 실제로 읽은 원격 경로 (패턴 해석 결과)
    pub path: String,
    /// 마지막 갱신 시각
    pub updated_at: DateTime<Utc>,
}

/// 플레이어 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// 접속 대기열
    Queued,
    /// 접속 중
    Online,
    /// 접속 종료
    Offline,
}

impl SessionState {
    /// 열린 세션(대기열 또는 접속 중)인지 확인합니다.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Queued | Self::Online)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// 세션 복합 키 (tenant, source, player_key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    /// 소스 키
    pub source: SourceKey,
    /// 플레이어 식별자
    pub player_key: String,
}

impl SessionKey {
    /// 새 세션 키를 생성합니다.
    pub fn new(source: SourceKey, player_key: impl Into<String>) -> Self {
        Self {
            source,
            player_key: player_key.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.player_key)
    }
}

/// 플레이어 세션
///
/// 상태 전이는 `queued → online → offline`, `queued → offline`,
/// `online → offline`만 허용되며 `last_transition_at`은 뒤로 가지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSession {
    /// 세션 키
    pub key: SessionKey,
    /// 표시 이름
    pub display_name: Option<String>,
    /// 현재 상태
    pub state: SessionState,
    /// 마지막 전이 시각 (로그 타임스탬프 기준)
    pub last_transition_at: DateTime<Utc>,
}

/// 소스별 활성 세션 수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActiveCounts {
    /// 접속 중
    pub online: usize,
    /// 대기열
    pub queued: usize,
}

impl ActiveCounts {
    /// 세션 목록에서 활성 수를 집계합니다.
    pub fn from_sessions<'a>(sessions: impl IntoIterator<Item = &'a PlayerSession>) -> Self {
        sessions
            .into_iter()
            .fold(Self::default(), |mut acc, session| {
                match session.state {
                    SessionState::Online => acc.online += 1,
                    SessionState::Queued => acc.queued += 1,
                    SessionState::Offline => {}
                }
                acc
            })
    }

    /// 대기열을 포함한 전체 활성 수
    pub fn total(&self) -> usize {
        self.online + self.queued
    }
}

/// 원격 인증 수단
#[derive(Clone, PartialEq, Eq)]
pub enum SourceAuth {
    /// 비밀번호 인증
    Password(String),
    /// 개인키 파일 인증
    PrivateKey {
        /// 개인키 경로
        path: String,
        /// 개인키 암호
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SourceAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::PrivateKey { path, .. } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

/// 원격 접속 자격 증명
///
/// 외부 관리 계층이 제공하며, 코어는 해석하지 않고 커넥터에 전달만 합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCredentials {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
    /// 사용자명
    pub username: String,
    /// 인증 수단
    pub auth: SourceAuth,
}

/// 알림 목적지 매핑
///
/// 알림 종류별 목적지 ID. 지정되지 않은 종류의 알림은 전송하지 않습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationMap {
    /// 플레이어 접속/종료 알림
    pub player_activity: Option<String>,
    /// 월드 이벤트 알림
    pub world_events: Option<String>,
    /// 킬 피드 알림
    pub kill_feed: Option<String>,
}

/// 소스 설정
///
/// `[[sources]]` 섹션 하나에 해당합니다.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// 테넌트 ID
    pub tenant_id: String,
    /// 소스 ID
    pub source_id: String,
    /// 원격 호스트
    pub host: String,
    /// SSH 포트
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// 사용자명
    pub username: String,
    /// 비밀번호 (private_key_path와 배타)
    #[serde(default)]
    pub password: Option<String>,
    /// 개인키 경로
    #[serde(default)]
    pub private_key_path: Option<String>,
    /// 개인키 암호
    #[serde(default)]
    pub passphrase: Option<String>,
    /// 원격 로그 경로 (마지막 컴포넌트에 `*` 허용)
    pub remote_path: String,
    /// 활성화 여부
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 알림 목적지
    #[serde(default)]
    pub destinations: DestinationMap,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    /// 소스 키를 반환합니다.
    pub fn key(&self) -> SourceKey {
        SourceKey::new(&self.tenant_id, &self.source_id)
    }

    /// 인증 수단을 결정합니다.
    pub fn auth(&self) -> Result<SourceAuth, ConfigError> {
        match (&self.password, &self.private_key_path) {
            (Some(password), None) => Ok(SourceAuth::Password(password.clone())),
            (None, Some(path)) => Ok(SourceAuth::PrivateKey {
                path: path.clone(),
                passphrase: self.passphrase.clone(),
            }),
            (Some(_), Some(_)) => Err(ConfigError::InvalidValue {
                field: format!("sources.{}.password", self.key()),
                reason: "password and private_key_path are mutually exclusive".to_owned(),
            }),
            (None, None) => Err(ConfigError::InvalidValue {
                field: format!("sources.{}.password", self.key()),
                reason: "either password or private_key_path is required".to_owned(),
            }),
        }
    }

    /// 커넥터에 전달할 자격 증명을 만듭니다.
    pub fn credentials(&self) -> Result<SourceCredentials, ConfigError> {
        Ok(SourceCredentials {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            auth: self.auth()?,
        })
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("tenant_id", &self.tenant_id)
            .field("source_id", &self.source_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("remote_path", &self.remote_path)
            .field("enabled", &self.enabled)
            .field("destinations", &self.destinations)
            .finish_non_exhaustive()
    }
}
