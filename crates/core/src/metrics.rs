//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `tailpost_`
//! - 영역: `remote_`, `tailer_`, `extractor_`, `sessions_`, `delivery_`, `cycle_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(tailpost_core::metrics::TAILER_BYTES_READ_TOTAL).increment(512);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 소스 레이블 키 (`tenant/source`)
pub const LABEL_SOURCE: &str = "source";

/// 전송 전략 레이블 키 (modern, compat, legacy)
pub const LABEL_STRATEGY: &str = "strategy";

/// 이벤트 카테고리 레이블 키
pub const LABEL_CATEGORY: &str = "category";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 사이클 단계 레이블 키
pub const LABEL_STAGE: &str = "stage";

// ─── Remote 메트릭 ─────────────────────────────────────────────────

/// Remote: 새 세션 연결 시도 수 (counter, labels: strategy, result)
pub const REMOTE_CONNECT_ATTEMPTS_TOTAL: &str = "tailpost_remote_connect_attempts_total";

/// Remote: 유휴 세션 재사용 수 (counter)
pub const REMOTE_SESSIONS_REUSED_TOTAL: &str = "tailpost_remote_sessions_reused_total";

/// Remote: 퇴출된 세션 수 (counter)
pub const REMOTE_SESSIONS_EVICTED_TOTAL: &str = "tailpost_remote_sessions_evicted_total";

/// Remote: 풀에 보관 중인 세션 수 (gauge)
pub const REMOTE_POOLED_SESSIONS: &str = "tailpost_remote_pooled_sessions";

/// Remote: 블로킹 작업 소요 시간 (histogram, 초)
pub const REMOTE_OPERATION_DURATION_SECONDS: &str = "tailpost_remote_operation_duration_seconds";

// ─── Tailer 메트릭 ─────────────────────────────────────────────────

/// Tailer: 읽은 바이트 수 (counter)
pub const TAILER_BYTES_READ_TOTAL: &str = "tailpost_tailer_bytes_read_total";

/// Tailer: 방출한 완전한 라인 수 (counter)
pub const TAILER_LINES_TOTAL: &str = "tailpost_tailer_lines_total";

/// Tailer: 디코드 에러 수 (counter)
pub const TAILER_DECODE_ERRORS_TOTAL: &str = "tailpost_tailer_decode_errors_total";

/// Tailer: 콜드 스타트 수 (counter)
pub const TAILER_COLD_STARTS_TOTAL: &str = "tailpost_tailer_cold_starts_total";

// ─── Extractor 메트릭 ──────────────────────────────────────────────

/// Extractor: 추출된 이벤트 수 (counter, label: category)
pub const EXTRACTOR_EVENTS_TOTAL: &str = "tailpost_extractor_events_total";

/// Extractor: 어떤 규칙에도 매칭되지 않은 라인 수 (counter)
pub const EXTRACTOR_UNMATCHED_LINES_TOTAL: &str = "tailpost_extractor_unmatched_lines_total";

// ─── Session 메트릭 ────────────────────────────────────────────────

/// Sessions: 적용된 상태 전이 수 (counter)
pub const SESSIONS_TRANSITIONS_TOTAL: &str = "tailpost_sessions_transitions_total";

/// Sessions: 순서가 뒤바뀌어 무시된 이벤트 수 (counter)
pub const SESSIONS_STALE_EVENTS_TOTAL: &str = "tailpost_sessions_stale_events_total";

/// Sessions: 재조정으로 오프라인 처리된 세션 수 (counter)
pub const SESSIONS_RECONCILED_TOTAL: &str = "tailpost_sessions_reconciled_total";

// ─── Delivery 메트릭 ───────────────────────────────────────────────

/// Delivery: 큐에 들어간 알림 수 (counter)
pub const DELIVERY_ENQUEUED_TOTAL: &str = "tailpost_delivery_enqueued_total";

/// Delivery: 쿨다운으로 억제된 중복 알림 수 (counter)
pub const DELIVERY_DEDUPLICATED_TOTAL: &str = "tailpost_delivery_deduplicated_total";

/// Delivery: 전송 완료 알림 수 (counter)
pub const DELIVERY_SENT_TOTAL: &str = "tailpost_delivery_sent_total";

/// Delivery: 전송 실패 수 (counter)
pub const DELIVERY_FAILED_TOTAL: &str = "tailpost_delivery_failed_total";

/// Delivery: 만료/거부로 폐기된 알림 수 (counter)
pub const DELIVERY_DROPPED_TOTAL: &str = "tailpost_delivery_dropped_total";

/// Delivery: 대기 중인 알림 수 (gauge)
pub const DELIVERY_QUEUE_DEPTH: &str = "tailpost_delivery_queue_depth";

// ─── Cycle 메트릭 ──────────────────────────────────────────────────

/// Cycle: 완료된 소스 사이클 수 (counter, label: result)
pub const CYCLE_RUNS_TOTAL: &str = "tailpost_cycle_runs_total";

/// Cycle: 단계별 실패 수 (counter, label: stage)
pub const CYCLE_FAILURES_TOTAL: &str = "tailpost_cycle_failures_total";

/// Cycle: 사이클 소요 시간 (histogram, 초)
pub const CYCLE_DURATION_SECONDS: &str = "tailpost_cycle_duration_seconds";

/// Cycle: 활성 소스 수 (gauge)
pub const CYCLE_ACTIVE_SOURCES: &str = "tailpost_cycle_active_sources";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "tailpost_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "tailpost_daemon_build_info";

// ─── 히스토그램 버킷 정의 ──────────────────────────────────────────

/// 원격 작업/사이클 지연 시간 히스토그램 버킷 (초)
///
/// 10ms ~ 60s 범위 (원격 호출은 네트워크 왕복 포함)
pub const REMOTE_DURATION_BUCKETS: [f64; 10] =
    [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0];

// ─── 설명 등록 함수 ────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Remote
    describe_counter!(
        REMOTE_CONNECT_ATTEMPTS_TOTAL,
        "Remote connection attempts by transport strategy and result"
    );
    describe_counter!(
        REMOTE_SESSIONS_REUSED_TOTAL,
        "Pooled sessions reused without reconnecting"
    );
    describe_counter!(
        REMOTE_SESSIONS_EVICTED_TOTAL,
        "Pooled sessions closed after failure or idle expiry"
    );
    describe_gauge!(REMOTE_POOLED_SESSIONS, "Sessions currently held by the pool");
    describe_histogram!(
        REMOTE_OPERATION_DURATION_SECONDS,
        "Duration of blocking remote operations in seconds"
    );

    // Tailer
    describe_counter!(TAILER_BYTES_READ_TOTAL, "Bytes read from remote log files");
    describe_counter!(TAILER_LINES_TOTAL, "Complete lines emitted by the tailer");
    describe_counter!(
        TAILER_DECODE_ERRORS_TOTAL,
        "Lines with invalid encoding or exceeding the read window"
    );
    describe_counter!(
        TAILER_COLD_STARTS_TOTAL,
        "Cold starts caused by missing cursors, rotation or truncation"
    );

    // Extractor
    describe_counter!(EXTRACTOR_EVENTS_TOTAL, "Events extracted by category");
    describe_counter!(
        EXTRACTOR_UNMATCHED_LINES_TOTAL,
        "Lines that matched no extraction rule"
    );

    // Sessions
    describe_counter!(
        SESSIONS_TRANSITIONS_TOTAL,
        "Player session state transitions applied"
    );
    describe_counter!(
        SESSIONS_STALE_EVENTS_TOTAL,
        "Events ignored because they predate the last recorded transition"
    );
    describe_counter!(
        SESSIONS_RECONCILED_TOTAL,
        "Open sessions forced offline by reconciliation"
    );

    // Delivery
    describe_counter!(DELIVERY_ENQUEUED_TOTAL, "Notification tasks enqueued");
    describe_counter!(
        DELIVERY_DEDUPLICATED_TOTAL,
        "Notification tasks suppressed by the dedup cooldown"
    );
    describe_counter!(DELIVERY_SENT_TOTAL, "Notifications delivered to a sink");
    describe_counter!(DELIVERY_FAILED_TOTAL, "Notification send attempts that failed");
    describe_counter!(
        DELIVERY_DROPPED_TOTAL,
        "Notification tasks dropped after expiry or permanent rejection"
    );
    describe_gauge!(DELIVERY_QUEUE_DEPTH, "Notification tasks waiting for delivery");

    // Cycle
    describe_counter!(CYCLE_RUNS_TOTAL, "Source cycles completed by result");
    describe_counter!(CYCLE_FAILURES_TOTAL, "Source cycle failures by stage");
    describe_histogram!(
        CYCLE_DURATION_SECONDS,
        "Duration of a single source cycle in seconds"
    );
    describe_gauge!(CYCLE_ACTIVE_SOURCES, "Sources with a running cycle loop");

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Tailpost daemon uptime in seconds");
    describe_gauge!(DAEMON_BUILD_INFO, "Build information (always 1, with version label)");
}
