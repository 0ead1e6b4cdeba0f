//! Tailpost 수집 파이프라인
//!
//! 원격에서 읽은 로그 라인을 이벤트로 바꾸고, 플레이어 세션 상태를 갱신하고,
//! 파생된 알림을 속도 제한에 맞춰 외부 싱크로 보냅니다.
//!
//! # 모듈 구성
//!
//! - [`extractor`]: 타임스탬프 접두어에 고정된 정규식 규칙으로 라인에서 이벤트 추출
//! - [`session`]: 플레이어 세션 상태 기계 (멱등 upsert, 콜드 스타트 정리)
//! - [`notify`]: 세션 전이와 월드 이벤트에서 알림 생성
//! - [`batcher`]: 목적지별 큐, dedup 쿨다운, 분당 한도, 속도 제한 대응
//! - [`sink`]: 알림 싱크 trait과 웹훅 구현
//! - [`cycle`]: 소스 사이클 단계 실행
//! - [`controls`]: 소스 레지스트리와 운영 제어
//! - [`pipeline`]: 전체 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! SessionPool -> Tailer -> Extractor -> SessionMachine -> DeliveryBatcher -> NotificationSink
//!      |            |          |              |                  |
//!   SSH/SFTP    cold/hot   YAML + 내장     StateStore      cooldown + cap
//! ```

pub mod batcher;
pub mod config;
pub mod controls;
pub mod cycle;
pub mod error;
pub mod extractor;
pub mod notify;
pub mod pipeline;
pub mod session;
pub mod sink;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{IngestPipeline, IngestPipelineBuilder, RefreshReport};

// 설정
pub use config::{PipelineConfig, PipelineConfigBuilder};

// 에러
pub use error::IngestError;

// 사이클
pub use cycle::{CycleError, CycleReport, CycleStage};

// 운영 제어
pub use controls::{CycleSummary, IngestControls, SourceStatus};

// 추출기
pub use extractor::{EventCategory, Extractor, FieldValue, RawEvent, RuleLoader};

// 세션
pub use session::{ApplyOutcome, SessionMachine, SessionTransition};

// 알림
pub use notify::{NotificationKind, NotificationPayload};

// 전달
pub use batcher::{BatcherSettings, DeliveryBatcher, DrainReport, EnqueueResult};
pub use sink::{LogSink, NotificationSink, SendOutcome, SinkError, WebhookSink};
