//! Tailpost 공통 크레이트
//!
//! 원격 로그 수집 엔진의 모든 크레이트가 공유하는 도메인 타입, 에러,
//! 설정, 영속 저장소 인터페이스, 외부 협력자 trait을 정의합니다.

pub mod cache;
pub mod collab;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, PipelineError, StoreError, TailpostError};

// 설정
pub use config::TailpostConfig;

// 협력자 인터페이스
pub use collab::{AdminHooks, LoggingAdminHooks, NoopAdminHooks, SourceProvider, StaticSourceProvider};

// 파이프라인 trait
pub use pipeline::{BoxFuture, HealthStatus, Pipeline};

// 저장소
pub use store::{JsonFileStore, MemoryStore, StateStore, TimeoutStore};

// 캐시
pub use cache::TtlCache;

// 도메인 타입
pub use types::{
    ActiveCounts, CursorMode, DestinationMap, PlayerSession, SessionKey, SessionState,
    SourceAuth, SourceConfig, SourceCredentials, SourceCursor, SourceFingerprint, SourceKey,
};
