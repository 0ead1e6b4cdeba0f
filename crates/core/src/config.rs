//! 설정 관리 -- tailpost.toml 파싱 및 런타임 설정
//!
//! [`TailpostConfig`]는 모든 크레이트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`TAILPOST_DELIVERY_COOLDOWN_SECS=120` 형식)
//! 3. 설정 파일 (`tailpost.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), tailpost_core::error::TailpostError> {
//! use tailpost_core::config::TailpostConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = TailpostConfig::load("tailpost.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = TailpostConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, TailpostError};
use crate::types::SourceConfig;

/// Tailpost 통합 설정
///
/// `tailpost.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 크레이트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailpostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 원격 세션 풀 설정
    #[serde(default)]
    pub remote: RemoteConfig,
    /// 증분 테일러 설정
    #[serde(default)]
    pub tailer: TailerConfig,
    /// 스케줄러 설정
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// 저장소 설정
    #[serde(default)]
    pub store: StoreConfig,
    /// 알림 전달 설정
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// 이벤트 추출기 설정
    #[serde(default)]
    pub extractor: ExtractorConfig,
    /// 알림 싱크 설정
    #[serde(default)]
    pub sink: SinkConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 소스 목록
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl TailpostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TailpostError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TailpostError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TailpostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                TailpostError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, TailpostError> {
        toml::from_str(toml_str).map_err(|e| {
            TailpostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `TAILPOST_{SECTION}_{FIELD}`
    /// 소스 목록과 웹훅 URL은 오버라이드 대상이 아닙니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "TAILPOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "TAILPOST_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "TAILPOST_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "TAILPOST_GENERAL_PID_FILE");

        // Remote
        override_u64(
            &mut self.remote.connect_timeout_secs,
            "TAILPOST_REMOTE_CONNECT_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.remote.io_timeout_secs,
            "TAILPOST_REMOTE_IO_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.remote.idle_threshold_secs,
            "TAILPOST_REMOTE_IDLE_THRESHOLD_SECS",
        );
        override_usize(&mut self.remote.max_workers, "TAILPOST_REMOTE_MAX_WORKERS");

        // Tailer
        override_u64(&mut self.tailer.max_read_bytes, "TAILPOST_TAILER_MAX_READ_BYTES");

        // Scheduler
        override_u64(
            &mut self.scheduler.poll_interval_secs,
            "TAILPOST_SCHEDULER_POLL_INTERVAL_SECS",
        );
        override_u64(
            &mut self.scheduler.source_refresh_secs,
            "TAILPOST_SCHEDULER_SOURCE_REFRESH_SECS",
        );

        // Store
        override_string(&mut self.store.backend, "TAILPOST_STORE_BACKEND");
        override_string(&mut self.store.path, "TAILPOST_STORE_PATH");
        override_u64(&mut self.store.timeout_secs, "TAILPOST_STORE_TIMEOUT_SECS");

        // Delivery
        override_u64(
            &mut self.delivery.cooldown_secs,
            "TAILPOST_DELIVERY_COOLDOWN_SECS",
        );
        override_usize(&mut self.delivery.batch_size, "TAILPOST_DELIVERY_BATCH_SIZE");
        override_u32(
            &mut self.delivery.per_minute_cap,
            "TAILPOST_DELIVERY_PER_MINUTE_CAP",
        );
        override_u64(
            &mut self.delivery.inter_message_delay_ms,
            "TAILPOST_DELIVERY_INTER_MESSAGE_DELAY_MS",
        );

        // Extractor
        override_string(
            &mut self.extractor.rules_file,
            "TAILPOST_EXTRACTOR_RULES_FILE",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "TAILPOST_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "TAILPOST_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "TAILPOST_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), TailpostError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.remote.validate()?;
        self.tailer.validate()?;
        self.scheduler.validate()?;
        self.store.validate()?;
        self.delivery.validate()?;
        self.validate_sources()?;

        Ok(())
    }

    fn validate_sources(&self) -> Result<(), TailpostError> {
        let mut seen = HashSet::new();

        for source in &self.sources {
            let key = source.key();
            let field = |name: &str| format!("sources.{key}.{name}");

            if source.tenant_id.is_empty() || source.source_id.is_empty() {
                return Err(invalid(
                    "sources",
                    "tenant_id and source_id must not be empty".to_owned(),
                ));
            }
            if !seen.insert(key.clone()) {
                return Err(invalid(field("source_id"), "duplicate source key".to_owned()));
            }
            if source.host.is_empty() {
                return Err(invalid(field("host"), "must not be empty".to_owned()));
            }
            if source.port == 0 {
                return Err(invalid(field("port"), "must be 1-65535".to_owned()));
            }
            if source.username.is_empty() {
                return Err(invalid(field("username"), "must not be empty".to_owned()));
            }
            if source.remote_path.is_empty() {
                return Err(invalid(field("remote_path"), "must not be empty".to_owned()));
            }
            source.auth()?;

            for destination in [
                &source.destinations.player_activity,
                &source.destinations.world_events,
                &source.destinations.kill_feed,
            ]
            .into_iter()
            .flatten()
            {
                if !self.sink.webhooks.is_empty() && !self.sink.webhooks.contains_key(destination)
                {
                    return Err(invalid(
                        field("destinations"),
                        format!("destination '{destination}' has no configured webhook"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// 파일 저장소 경로를 결정합니다.
    ///
    /// `store.path`가 비어 있으면 `<data_dir>/state.json`을 사용합니다.
    pub fn store_path(&self) -> PathBuf {
        if self.store.path.is_empty() {
            Path::new(&self.general.data_dir).join("state.json")
        } else {
            PathBuf::from(&self.store.path)
        }
    }
}

fn invalid(field: impl Into<String>, reason: String) -> TailpostError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
    /// PID 파일 경로 (빈 문자열이면 사용 안 함)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/tailpost".to_owned(),
            pid_file: "/var/run/tailpost.pid".to_owned(),
        }
    }
}

/// 전송 파라미터 전략 설정
///
/// 각 필드는 libssh2 메서드 선호 문자열(쉼표 구분)입니다.
/// `None`이면 라이브러리 기본값을 사용합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// 전략 이름
    pub name: String,
    /// 키 교환 알고리즘
    #[serde(default)]
    pub kex: Option<String>,
    /// 호스트 키 알고리즘
    #[serde(default)]
    pub host_key: Option<String>,
    /// 암호화 알고리즘 (양방향 동일)
    #[serde(default)]
    pub ciphers: Option<String>,
    /// MAC 알고리즘 (양방향 동일)
    #[serde(default)]
    pub macs: Option<String>,
}

impl StrategyConfig {
    /// 기본 전략 목록 (modern → compat → legacy)
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                name: "modern".to_owned(),
                kex: Some(
                    "curve25519-sha256,curve25519-sha256@libssh.org,ecdh-sha2-nistp256,diffie-hellman-group16-sha512"
                        .to_owned(),
                ),
                host_key: Some("ssh-ed25519,ecdsa-sha2-nistp256,rsa-sha2-512,rsa-sha2-256".to_owned()),
                ciphers: Some("aes256-gcm@openssh.com,aes128-gcm@openssh.com,aes256-ctr,aes128-ctr".to_owned()),
                macs: Some("hmac-sha2-256,hmac-sha2-512".to_owned()),
            },
            Self {
                name: "compat".to_owned(),
                kex: Some("diffie-hellman-group14-sha256,diffie-hellman-group14-sha1".to_owned()),
                host_key: Some("rsa-sha2-256,ssh-rsa".to_owned()),
                ciphers: Some("aes256-ctr,aes192-ctr,aes128-ctr".to_owned()),
                macs: Some("hmac-sha2-256,hmac-sha1".to_owned()),
            },
            Self {
                name: "legacy".to_owned(),
                kex: Some(
                    "diffie-hellman-group-exchange-sha1,diffie-hellman-group1-sha1".to_owned(),
                ),
                host_key: Some("ssh-rsa,ssh-dss".to_owned()),
                ciphers: Some("aes128-cbc,3des-cbc,aes256-cbc".to_owned()),
                macs: Some("hmac-sha1,hmac-md5".to_owned()),
            },
        ]
    }
}

/// 원격 세션 풀 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// 전략당 접속 타임아웃 (초)
    pub connect_timeout_secs: u64,
    /// stat/read 호출 타임아웃 (초)
    pub io_timeout_secs: u64,
    /// 유휴 세션 재사용 한도 (초)
    pub idle_threshold_secs: u64,
    /// 블로킹 작업자 풀 크기
    pub max_workers: usize,
    /// 호스트별 성공 전략 기억 시간 (초)
    pub strategy_cache_ttl_secs: u64,
    /// 시도 순서대로 나열한 전략 목록
    pub strategies: Vec<StrategyConfig>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            io_timeout_secs: 15,
            idle_threshold_secs: 120,
            max_workers: 8,
            strategy_cache_ttl_secs: 3600,
            strategies: StrategyConfig::defaults(),
        }
    }
}

impl RemoteConfig {
    fn validate(&self) -> Result<(), TailpostError> {
        const MAX_WORKERS: usize = 256;

        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > 120 {
            return Err(invalid("remote.connect_timeout_secs", "must be 1-120".to_owned()));
        }
        if self.io_timeout_secs == 0 || self.io_timeout_secs > 300 {
            return Err(invalid("remote.io_timeout_secs", "must be 1-300".to_owned()));
        }
        if self.max_workers == 0 || self.max_workers > MAX_WORKERS {
            return Err(invalid(
                "remote.max_workers",
                format!("must be 1-{MAX_WORKERS}"),
            ));
        }
        if self.strategies.is_empty() {
            return Err(invalid(
                "remote.strategies",
                "at least one transport strategy is required".to_owned(),
            ));
        }
        let mut names = HashSet::new();
        for strategy in &self.strategies {
            if strategy.name.is_empty() || !names.insert(strategy.name.as_str()) {
                return Err(invalid(
                    "remote.strategies",
                    format!("strategy names must be unique and non-empty: '{}'", strategy.name),
                ));
            }
        }
        Ok(())
    }
}

/// 증분 테일러 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailerConfig {
    /// 사이클당 최대 읽기 바이트
    pub max_read_bytes: u64,
    /// 지문 계산에 사용할 선두 바이트 수
    pub fingerprint_bytes: u64,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            max_read_bytes: 1024 * 1024, // 1MB
            fingerprint_bytes: 256,
        }
    }
}

impl TailerConfig {
    fn validate(&self) -> Result<(), TailpostError> {
        const MAX_READ: u64 = 64 * 1024 * 1024;

        if self.max_read_bytes == 0 || self.max_read_bytes > MAX_READ {
            return Err(invalid(
                "tailer.max_read_bytes",
                format!("must be 1-{MAX_READ}"),
            ));
        }
        if self.fingerprint_bytes == 0 || self.fingerprint_bytes > 4096 {
            return Err(invalid("tailer.fingerprint_bytes", "must be 1-4096".to_owned()));
        }
        Ok(())
    }
}

/// 스케줄러 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 소스별 사이클 주기 (초)
    pub poll_interval_secs: u64,
    /// 소스 목록 갱신 주기 (초)
    pub source_refresh_secs: u64,
    /// 종료 시 실행 중 사이클 대기 시간 (초)
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            source_refresh_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), TailpostError> {
        if self.poll_interval_secs == 0 || self.poll_interval_secs > 3600 {
            return Err(invalid("scheduler.poll_interval_secs", "must be 1-3600".to_owned()));
        }
        if self.source_refresh_secs == 0 {
            return Err(invalid(
                "scheduler.source_refresh_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }
}

/// 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 백엔드 (file, memory)
    pub backend: String,
    /// 파일 저장소 경로 (빈 문자열이면 data_dir/state.json)
    pub path: String,
    /// 호출당 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_owned(),
            path: String::new(),
            timeout_secs: 5,
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<(), TailpostError> {
        let valid_backends = ["file", "memory"];
        if !valid_backends.contains(&self.backend.as_str()) {
            return Err(invalid(
                "store.backend",
                format!("must be one of: {}", valid_backends.join(", ")),
            ));
        }
        if self.timeout_secs == 0 || self.timeout_secs > 9 {
            return Err(invalid("store.timeout_secs", "must be 1-9".to_owned()));
        }
        Ok(())
    }
}

/// 알림 전달 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// dedup 키 쿨다운 (초)
    pub cooldown_secs: u64,
    /// 목적지당 드레인 배치 크기
    pub batch_size: usize,
    /// 메시지 간 지연 (밀리초)
    pub inter_message_delay_ms: u64,
    /// 전역 분당 전송 한도
    pub per_minute_cap: u32,
    /// 드레인 주기 (밀리초)
    pub drain_interval_ms: u64,
    /// 큐 대기 최대 시간 (초)
    pub task_ttl_secs: u64,
    /// 종료 시 flush 최대 시간 (초)
    pub flush_deadline_secs: u64,
    /// 싱크 호출 타임아웃 (초)
    pub send_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            batch_size: 5,
            inter_message_delay_ms: 1000,
            per_minute_cap: 30,
            drain_interval_ms: 2000,
            task_ttl_secs: 1800,
            flush_deadline_secs: 15,
            send_timeout_secs: 10,
        }
    }
}

impl DeliveryConfig {
    fn validate(&self) -> Result<(), TailpostError> {
        if self.batch_size == 0 || self.batch_size > 100 {
            return Err(invalid("delivery.batch_size", "must be 1-100".to_owned()));
        }
        if self.per_minute_cap == 0 {
            return Err(invalid(
                "delivery.per_minute_cap",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.drain_interval_ms == 0 {
            return Err(invalid(
                "delivery.drain_interval_ms",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.task_ttl_secs == 0 {
            return Err(invalid(
                "delivery.task_ttl_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.send_timeout_secs == 0 {
            return Err(invalid(
                "delivery.send_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }
}

/// 이벤트 추출기 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// 추가 YAML 규칙 파일 (빈 문자열이면 내장 규칙만 사용)
    pub rules_file: String,
}

/// 알림 싱크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// HTTP 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 목적지 ID → 웹훅 URL
    pub webhooks: BTreeMap<String, String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            webhooks: BTreeMap::new(),
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9108,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
