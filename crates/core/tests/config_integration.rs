//! tailpost.toml 통합 설정 테스트
//!
//! - tailpost.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 빈 파일 / 잘못된 형식 에러 테스트

use tailpost_core::config::TailpostConfig;
use tailpost_core::error::{ConfigError, TailpostError};
use tailpost_core::types::SourceAuth;

const EXAMPLE: &str = include_str!("../../../tailpost.toml.example");

// =============================================================================
// tailpost.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_and_validates() {
    let config = TailpostConfig::parse(EXAMPLE).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.data_dir, "/var/lib/tailpost");
}

#[test]
fn example_config_matches_code_defaults() {
    let from_file = TailpostConfig::parse(EXAMPLE).expect("should parse");
    let from_code = TailpostConfig::default();

    assert_eq!(from_file.general.log_format, from_code.general.log_format);
    assert_eq!(from_file.general.pid_file, from_code.general.pid_file);

    assert_eq!(
        from_file.remote.connect_timeout_secs,
        from_code.remote.connect_timeout_secs
    );
    assert_eq!(from_file.remote.max_workers, from_code.remote.max_workers);
    assert_eq!(from_file.remote.strategies, from_code.remote.strategies);

    assert_eq!(
        from_file.tailer.max_read_bytes,
        from_code.tailer.max_read_bytes
    );
    assert_eq!(
        from_file.scheduler.poll_interval_secs,
        from_code.scheduler.poll_interval_secs
    );
    assert_eq!(from_file.store.timeout_secs, from_code.store.timeout_secs);
    assert_eq!(
        from_file.delivery.cooldown_secs,
        from_code.delivery.cooldown_secs
    );
    assert_eq!(
        from_file.delivery.per_minute_cap,
        from_code.delivery.per_minute_cap
    );
    assert_eq!(from_file.metrics.port, from_code.metrics.port);
}

#[test]
fn example_config_source_uses_private_key() {
    let config = TailpostConfig::parse(EXAMPLE).expect("should parse");
    let source = &config.sources[0];

    assert_eq!(source.key().to_string(), "guild-1/eu-1");
    assert!(matches!(
        source.auth().expect("auth should resolve"),
        SourceAuth::PrivateKey { .. }
    ));
    assert_eq!(
        source.destinations.kill_feed.as_deref(),
        Some("eu-kills")
    );
    assert_eq!(config.sink.webhooks.len(), 3);
}

// =============================================================================
// 부분 설정 로딩 테스트
// =============================================================================

#[test]
fn partial_config_general_only() {
    let toml = r#"
[general]
log_level = "debug"
log_format = "pretty"
"#;
    let config = TailpostConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.log_format, "pretty");
    // 나머지 섹션은 기본값
    assert_eq!(config.delivery.batch_size, 5);
    assert_eq!(config.remote.strategies.len(), 3);
}

#[test]
fn partial_config_custom_strategy_list() {
    let toml = r#"
[[remote.strategies]]
name = "only-legacy"
kex = "diffie-hellman-group1-sha1"
"#;
    let config = TailpostConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.remote.strategies.len(), 1);
    assert_eq!(config.remote.strategies[0].name, "only-legacy");
    assert!(config.remote.strategies[0].ciphers.is_none());
    // remote의 다른 필드는 기본값
    assert_eq!(config.remote.io_timeout_secs, 15);
}

#[test]
fn source_with_both_credentials_fails_validation() {
    let toml = r#"
[[sources]]
tenant_id = "t"
source_id = "s"
host = "h"
username = "u"
password = "p"
private_key_path = "/k"
remote_path = "/log"
"#;
    let config = TailpostConfig::parse(toml).expect("should parse");
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("mutually exclusive"));
}

#[test]
fn source_without_credentials_fails_validation() {
    let toml = r#"
[[sources]]
tenant_id = "t"
source_id = "s"
host = "h"
username = "u"
remote_path = "/log"
"#;
    let config = TailpostConfig::parse(toml).expect("should parse");
    assert!(matches!(
        config.validate().unwrap_err(),
        TailpostError::Config(ConfigError::InvalidValue { .. })
    ));
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[general]
log_level = "info"
"#;

    let original = std::env::var("TAILPOST_GENERAL_LOG_LEVEL").ok();
    // SAFETY: serial 테스트로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("TAILPOST_GENERAL_LOG_LEVEL", "error");
    }

    let mut config = TailpostConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    let result = config.general.log_level.clone();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("TAILPOST_GENERAL_LOG_LEVEL", val),
            None => std::env::remove_var("TAILPOST_GENERAL_LOG_LEVEL"),
        }
    }

    assert_eq!(result, "error");
}

#[test]
#[serial_test::serial]
fn env_override_numeric_fields() {
    // SAFETY: serial 테스트로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("TAILPOST_REMOTE_MAX_WORKERS", "16");
        std::env::set_var("TAILPOST_SCHEDULER_POLL_INTERVAL_SECS", "30");
    }

    let mut config = TailpostConfig::default();
    config.apply_env_overrides();

    // SAFETY: 테스트 정리
    unsafe {
        std::env::remove_var("TAILPOST_REMOTE_MAX_WORKERS");
        std::env::remove_var("TAILPOST_SCHEDULER_POLL_INTERVAL_SECS");
    }

    assert_eq!(config.remote.max_workers, 16);
    assert_eq!(config.scheduler.poll_interval_secs, 30);
}

#[test]
#[serial_test::serial]
fn env_override_missing_var_keeps_toml_value() {
    let toml = r#"
[delivery]
cooldown_secs = 90
"#;
    // SAFETY: serial 테스트로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::remove_var("TAILPOST_DELIVERY_COOLDOWN_SECS");
    }

    let mut config = TailpostConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    assert_eq!(config.delivery.cooldown_secs, 90);
}

// =============================================================================
// 에러 케이스
// =============================================================================

#[test]
fn whitespace_only_parses_with_defaults() {
    let config = TailpostConfig::parse("   \n\t\n").expect("should parse");
    assert_eq!(config.general.log_level, "info");
}

#[test]
fn malformed_toml_returns_parse_error() {
    let result = TailpostConfig::parse("[invalid toml");
    assert!(matches!(
        result.unwrap_err(),
        TailpostError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn wrong_type_for_numeric_field() {
    let toml = r#"
[delivery]
batch_size = "five"
"#;
    assert!(matches!(
        TailpostConfig::parse(toml).unwrap_err(),
        TailpostError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[tokio::test]
async fn load_example_config_from_disk() {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let example_path = format!("{manifest_dir}/../../tailpost.toml.example");

    let config = TailpostConfig::from_file(&example_path)
        .await
        .expect("example should load");
    config.validate().expect("loaded example should validate");
    assert_eq!(config.sources.len(), 1);
}

// =============================================================================
// 직렬화 라운드트립 테스트
// =============================================================================

#[test]
fn example_config_serialize_roundtrip() {
    let config = TailpostConfig::parse(EXAMPLE).expect("should parse");
    let serialized = toml::to_string_pretty(&config).expect("should serialize");
    let reparsed = TailpostConfig::parse(&serialized).expect("should reparse");
    reparsed.validate().expect("should validate");

    assert_eq!(config.remote.strategies, reparsed.remote.strategies);
    assert_eq!(config.sources, reparsed.sources);
    assert_eq!(config.sink.webhooks, reparsed.sink.webhooks);
}
