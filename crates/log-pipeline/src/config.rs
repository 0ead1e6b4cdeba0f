//! 수집 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 [`TailpostConfig`]에서 파이프라인이 쓰는 섹션만
//! 골라 담습니다.
//!
//! # 사용 예시
//! ```ignore
//! use tailpost_core::config::TailpostConfig;
//! use tailpost_log_pipeline::config::PipelineConfig;
//!
//! let core_config = TailpostConfig::load("tailpost.toml")?;
//! let config = PipelineConfig::from_core(&core_config);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tailpost_core::config::{DeliveryConfig, RemoteConfig, TailerConfig, TailpostConfig};
use tailpost_remote::TailSettings;

use crate::batcher::BatcherSettings;
use crate::error::IngestError;

/// 수집 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 소스별 사이클 주기 (초)
    pub poll_interval_secs: u64,
    /// 소스 목록 갱신 주기 (초)
    pub source_refresh_secs: u64,
    /// 종료 시 실행 중 사이클 대기 시간 (초)
    pub shutdown_grace_secs: u64,
    /// 저장소 호출 타임아웃 (초)
    pub store_timeout_secs: u64,
    /// 연속 실패가 이 횟수 이상이면 health가 Degraded
    pub failure_threshold: u32,
    /// 사용자 추출 규칙 파일 (빈 문자열이면 내장 규칙만)
    pub rules_file: String,
    /// 원격 접속 설정
    pub remote: RemoteConfig,
    /// 테일러 설정
    pub tailer: TailerConfig,
    /// 알림 전달 설정
    pub delivery: DeliveryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_core(&TailpostConfig::default())
    }
}

impl PipelineConfig {
    /// core 설정에서 파이프라인 설정을 생성합니다.
    pub fn from_core(core: &TailpostConfig) -> Self {
        Self {
            poll_interval_secs: core.scheduler.poll_interval_secs,
            source_refresh_secs: core.scheduler.source_refresh_secs,
            shutdown_grace_secs: core.scheduler.shutdown_grace_secs,
            store_timeout_secs: core.store.timeout_secs,
            failure_threshold: 3,
            rules_file: core.extractor.rules_file.clone(),
            remote: core.remote.clone(),
            tailer: core.tailer.clone(),
            delivery: core.delivery.clone(),
        }
    }

    /// 사이클 주기
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// 소스 목록 갱신 주기
    pub fn source_refresh(&self) -> Duration {
        Duration::from_secs(self.source_refresh_secs)
    }

    /// 종료 대기 시간
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// 저장소 호출 타임아웃
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// 종료 시 flush 마감 시간
    pub fn flush_deadline(&self) -> Duration {
        Duration::from_secs(self.delivery.flush_deadline_secs)
    }

    /// 사용자 규칙 파일 경로
    pub fn rules_path(&self) -> Option<PathBuf> {
        (!self.rules_file.trim().is_empty()).then(|| PathBuf::from(&self.rules_file))
    }

    /// 테일러 설정
    pub fn tail_settings(&self) -> TailSettings {
        TailSettings::from_config(&self.tailer)
    }

    /// 배처 설정
    pub fn batcher_settings(&self) -> BatcherSettings {
        BatcherSettings::from_config(&self.delivery)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IngestError> {
        const MAX_POLL_INTERVAL_SECS: u64 = 3600;

        if self.poll_interval_secs == 0 || self.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            return Err(config_err(
                "poll_interval_secs",
                format!("must be 1-{MAX_POLL_INTERVAL_SECS}"),
            ));
        }
        if self.source_refresh_secs == 0 {
            return Err(config_err("source_refresh_secs", "must be greater than 0"));
        }
        // single-digit seconds per store call
        if !(1..=9).contains(&self.store_timeout_secs) {
            return Err(config_err("store_timeout_secs", "must be 1-9"));
        }
        if self.failure_threshold == 0 {
            return Err(config_err("failure_threshold", "must be greater than 0"));
        }
        if self.tailer.max_read_bytes == 0 {
            return Err(config_err("tailer.max_read_bytes", "must be greater than 0"));
        }
        if self.tailer.fingerprint_bytes == 0 || self.tailer.fingerprint_bytes > 4096 {
            return Err(config_err("tailer.fingerprint_bytes", "must be 1-4096"));
        }
        if self.remote.max_workers == 0 {
            return Err(config_err("remote.max_workers", "must be greater than 0"));
        }
        if self.remote.strategies.is_empty() {
            return Err(config_err(
                "remote.strategies",
                "at least one strategy is required",
            ));
        }
        if self.delivery.batch_size == 0 {
            return Err(config_err("delivery.batch_size", "must be greater than 0"));
        }
        if self.delivery.per_minute_cap == 0 {
            return Err(config_err("delivery.per_minute_cap", "must be greater than 0"));
        }
        if self.delivery.task_ttl_secs == 0 {
            return Err(config_err("delivery.task_ttl_secs", "must be greater than 0"));
        }
        Ok(())
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> IngestError {
    IngestError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 파이프라인 설정 빌더
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 사이클 주기(초)를 설정합니다.
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs;
        self
    }

    /// 소스 목록 갱신 주기(초)를 설정합니다.
    pub fn source_refresh_secs(mut self, secs: u64) -> Self {
        self.config.source_refresh_secs = secs;
        self
    }

    /// 종료 대기 시간(초)을 설정합니다.
    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_secs = secs;
        self
    }

    /// 저장소 호출 타임아웃(초)을 설정합니다.
    pub fn store_timeout_secs(mut self, secs: u64) -> Self {
        self.config.store_timeout_secs = secs;
        self
    }

    /// Degraded 판정 연속 실패 횟수를 설정합니다.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// 사용자 규칙 파일을 설정합니다.
    pub fn rules_file(mut self, path: impl Into<String>) -> Self {
        self.config.rules_file = path.into();
        self
    }

    /// 원격 접속 설정을 지정합니다.
    pub fn remote(mut self, remote: RemoteConfig) -> Self {
        self.config.remote = remote;
        self
    }

    /// 테일러 설정을 지정합니다.
    pub fn tailer(mut self, tailer: TailerConfig) -> Self {
        self.config.tailer = tailer;
        self
    }

    /// 알림 전달 설정을 지정합니다.
    pub fn delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.config.delivery = delivery;
        self
    }

    /// 설정을 검증하고 `PipelineConfig`를 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
