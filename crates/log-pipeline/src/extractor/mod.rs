//! 이벤트 추출기 -- 원시 로그 라인을 타입이 있는 이벤트로 변환합니다.
//!
//! 순서가 있는 (카테고리, 패턴, 필드 매핑) 규칙 목록을 라인마다 평가하며,
//! 처음 매칭된 규칙이 이깁니다. 매칭되지 않은 라인은 조용히 버립니다.
//! 추출기는 상태가 없는 순수 함수이므로 여러 사이클이 공유합니다.
//!
//! # 라인 형식
//! ```text
//! [YYYY.MM.DD-HH.MM.SS:mmm][ nnn]Category: message
//! ```
//! 접두어가 없거나 깨진 라인은 어떤 규칙에도 매칭되지 않습니다.
//!
//! # 구성
//! - [`builtin`]: 내장 규칙 (접속, 킬, 월드 이벤트, 서버 종료)
//! - [`loader`]: YAML 사용자 규칙 로딩 및 검증 (내장 규칙보다 먼저 평가)
//! - [`event`]: [`RawEvent`] 및 필드 타입

pub mod builtin;
pub mod event;
pub mod loader;

pub use event::{EventCategory, FieldValue, RawEvent};
pub use loader::RuleLoader;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::counter;
use regex::Regex;
use serde::Deserialize;
use tailpost_core::metrics as m;

use crate::error::IngestError;

/// 타임스탬프 접두어
const PREFIX_PATTERN: &str =
    r"^\[(?P<ts>\d{4}\.\d{2}\.\d{2}-\d{2}\.\d{2}\.\d{2}:\d{3})\]\[\s*\d+\]";

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d-%H.%M.%S:%3f";

static PREFIX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(PREFIX_PATTERN).ok());

/// 필드 값 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// 문자열 그대로
    Text,
    /// `f64`로 파싱
    Number,
}

/// 캡처 그룹 → 이벤트 필드 매핑
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldSpec {
    /// 캡처 그룹 이름이자 필드 이름
    pub name: String,
    /// 값 종류
    #[serde(default = "default_kind")]
    pub kind: FieldKind,
}

fn default_kind() -> FieldKind {
    FieldKind::Text
}

impl FieldSpec {
    /// 새 필드 매핑을 생성합니다.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// 컴파일된 추출 규칙
#[derive(Debug, Clone)]
pub struct ExtractRule {
    category: EventCategory,
    pattern: Regex,
    fields: Vec<FieldSpec>,
}

impl ExtractRule {
    /// 메시지 패턴을 컴파일합니다.
    ///
    /// 패턴은 메시지 시작 위치에 고정됩니다. 선언된 필드는 모두 같은 이름의
    /// 캡처 그룹이 있어야 합니다.
    pub fn compile(
        category: EventCategory,
        pattern: &str,
        fields: Vec<FieldSpec>,
    ) -> Result<Self, IngestError> {
        let pattern = Regex::new(&format!("^(?:{pattern})"))?;

        for field in &fields {
            let declared = pattern
                .capture_names()
                .flatten()
                .any(|name| name == field.name);
            if !declared {
                return Err(IngestError::RuleValidation {
                    rule_id: category.to_string(),
                    reason: format!("field '{}' has no matching capture group", field.name),
                });
            }
        }

        Ok(Self {
            category,
            pattern,
            fields,
        })
    }

    /// 카테고리
    pub fn category(&self) -> &EventCategory {
        &self.category
    }

    /// 메시지에 대해 규칙을 평가합니다.
    ///
    /// 숫자 필드가 파싱되지 않으면 이벤트를 만들지 않습니다.
    /// 매칭에 참여하지 않은 선택적 그룹은 필드에서 빠집니다.
    fn apply(&self, message: &str, timestamp: DateTime<Utc>) -> Option<RawEvent> {
        let caps = self.pattern.captures(message)?;
        let mut fields = BTreeMap::new();

        for spec in &self.fields {
            let Some(raw) = caps.name(&spec.name) else {
                continue;
            };
            let value = match spec.kind {
                FieldKind::Text => FieldValue::Text(raw.as_str().to_owned()),
                FieldKind::Number => FieldValue::Number(raw.as_str().parse().ok()?),
            };
            fields.insert(spec.name.clone(), value);
        }

        Some(RawEvent {
            timestamp,
            category: self.category.clone(),
            fields,
        })
    }
}

/// 라인 단위 이벤트 추출기
#[derive(Debug, Clone)]
pub struct Extractor {
    rules: Vec<ExtractRule>,
}

impl Extractor {
    /// 내장 규칙만 사용하는 추출기를 생성합니다.
    pub fn builtin() -> Result<Self, IngestError> {
        Self::with_custom(Vec::new())
    }

    /// 사용자 규칙을 내장 규칙 앞에 두고 추출기를 생성합니다.
    pub fn with_custom(custom: Vec<ExtractRule>) -> Result<Self, IngestError> {
        if PREFIX.is_none() {
            return Err(IngestError::RuleValidation {
                rule_id: "prefix".to_owned(),
                reason: "timestamp prefix pattern failed to compile".to_owned(),
            });
        }
        let mut rules = custom;
        rules.extend(builtin::builtin_rules()?);
        Ok(Self { rules })
    }

    /// 규칙 수
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 한 라인에서 이벤트를 추출합니다.
    pub fn extract(&self, line: &str) -> Option<RawEvent> {
        let (timestamp, message) = split_prefix(line)?;
        // 패턴이 처음 맞은 규칙이 라인을 가져갑니다. 필드 변환에 실패해도 다음 규칙으로 넘기지 않습니다.
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.pattern.is_match(message))?;
        rule.apply(message, timestamp)
    }

    /// 라인 목록에서 순서를 유지하며 이벤트를 추출합니다.
    pub fn extract_all(&self, lines: &[String]) -> Vec<RawEvent> {
        let mut events = Vec::new();
        let mut unmatched = 0u64;

        for line in lines {
            match self.extract(line) {
                Some(event) => {
                    counter!(m::EXTRACTOR_EVENTS_TOTAL, m::LABEL_CATEGORY => event.category.to_string())
                        .increment(1);
                    events.push(event);
                }
                None => unmatched += 1,
            }
        }

        if unmatched > 0 {
            counter!(m::EXTRACTOR_UNMATCHED_LINES_TOTAL).increment(unmatched);
        }
        events
    }
}

/// 접두어를 검사하고 (타임스탬프, 메시지)로 나눕니다.
fn split_prefix(line: &str) -> Option<(DateTime<Utc>, &str)> {
    let prefix = PREFIX.as_ref()?;
    let caps = prefix.captures(line)?;
    let whole = caps.get(0)?;
    let ts = caps.name("ts")?;
    let timestamp = NaiveDateTime::parse_from_str(ts.as_str(), TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    Some((timestamp, &line[whole.end()..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn extractor() -> Extractor {
        Extractor::builtin().unwrap()
    }

    #[test]
    fn parses_prefix_timestamp() {
        let (ts, message) = split_prefix("[2024.03.01-10.00.01:250][ 12]LogNet: hello").unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 1).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(ts, expected);
        assert_eq!(message, "LogNet: hello");
    }

    #[test]
    fn connect_intent_captures_name_and_player() {
        let event = extractor()
            .extract(r#"[2024.03.01-10.00.01:000][  1]LogNet: Join request: Name="Bo Jackson" EOSID=00a42"#)
            .unwrap();
        assert_eq!(event.category, EventCategory::PlayerConnectIntent);
        assert_eq!(event.player_key(), Some("00a42"));
        assert_eq!(event.text("name"), Some("Bo Jackson"));
    }

    #[test]
    fn confirm_and_disconnect_are_distinguished() {
        let ex = extractor();
        let confirmed = ex
            .extract(r#"[2024.03.01-10.00.02:000][  2]LogNet: Join succeeded: Name="Bo" EOSID=42"#)
            .unwrap();
        let gone = ex
            .extract("[2024.03.01-10.05.00:000][  3]LogNet: Player disconnected: EOSID=42")
            .unwrap();
        assert_eq!(confirmed.category, EventCategory::PlayerConnectConfirmed);
        assert_eq!(gone.category, EventCategory::PlayerDisconnect);
        assert_eq!(gone.player_key(), Some("42"));
    }

    #[test]
    fn kill_with_optional_distance() {
        let ex = extractor();
        let with = ex
            .extract(r#"[2024.03.01-11.00.00:000][ 40]LogCombat: Kill: Killer="Ann" Victim="Bo" Weapon="Bow" Distance=41.5"#)
            .unwrap();
        assert_eq!(with.category, EventCategory::PlayerKill);
        assert_eq!(with.number("distance"), Some(41.5));

        let without = ex
            .extract(r#"[2024.03.01-11.00.00:000][ 40]LogCombat: Kill: Killer="Ann" Victim="Bo" Weapon="Fists""#)
            .unwrap();
        assert_eq!(without.text("weapon"), Some("Fists"));
        assert!(!without.fields.contains_key("distance"));
    }

    #[test]
    fn world_events_capture_coordinates() {
        let ex = extractor();
        let drop = ex
            .extract("[2024.03.01-12.00.00:000][ 99]LogWorld: Airdrop spawned at X=-1200.5 Y=300 Z=12")
            .unwrap();
        assert_eq!(drop.category, EventCategory::Airdrop);
        assert_eq!(drop.number("x"), Some(-1200.5));
        assert_eq!(drop.number("z"), Some(12.0));

        let storm = ex
            .extract("[2024.03.01-12.10.00:000][100]LogWorld: Event started: Sandstorm")
            .unwrap();
        assert_eq!(storm.category, EventCategory::WorldEvent);
        assert_eq!(storm.text("event"), Some("Sandstorm"));

        let shutdown = ex
            .extract("[2024.03.01-23.59.59:999][101]LogWorld: Server shutting down")
            .unwrap();
        assert_eq!(shutdown.category, EventCategory::ServerShutdown);
        assert!(shutdown.fields.is_empty());
    }

    #[test]
    fn unanchored_fragments_do_not_match() {
        let ex = extractor();
        // missing prefix
        assert!(ex.extract("LogNet: Player disconnected: EOSID=42").is_none());
        // pattern appearing mid-message
        assert!(ex
            .extract("[2024.03.01-10.00.00:000][  0]LogChat: said LogNet: Player disconnected: EOSID=42")
            .is_none());
        // corrupted timestamp
        assert!(ex
            .extract("[2024.13.45-10.00.00:000][  0]LogNet: Player disconnected: EOSID=42")
            .is_none());
        // fragment of a split line
        assert!(ex.extract("d: EOSID=42").is_none());
    }

    #[test]
    fn unmatched_lines_are_dropped_in_order() {
        let lines = vec![
            "[2024.03.01-10.00.00:000][  0]LogInit: Engine started".to_owned(),
            r#"[2024.03.01-10.00.01:000][  1]LogNet: Join request: Name="Bo" EOSID=42"#.to_owned(),
            "garbage".to_owned(),
            "[2024.03.01-10.00.09:000][  2]LogNet: Player disconnected: EOSID=42".to_owned(),
        ];
        let events = extractor().extract_all(&lines);
        let categories: Vec<_> = events.iter().map(|e| e.category.clone()).collect();
        assert_eq!(
            categories,
            vec![EventCategory::PlayerConnectIntent, EventCategory::PlayerDisconnect]
        );
    }

    #[test]
    fn custom_rules_take_precedence() {
        let custom = ExtractRule::compile(
            EventCategory::Custom("vip_join".to_owned()),
            r#"LogNet: Join request: Name="\[VIP\] (?P<name>[^"]*)""#,
            vec![FieldSpec::new("name", FieldKind::Text)],
        )
        .unwrap();
        let ex = Extractor::with_custom(vec![custom]).unwrap();

        let event = ex
            .extract(r#"[2024.03.01-10.00.01:000][  1]LogNet: Join request: Name="[VIP] Ann" EOSID=7"#)
            .unwrap();
        assert_eq!(event.category, EventCategory::Custom("vip_join".to_owned()));
        assert_eq!(event.category.to_string(), "custom:vip_join");

        // non-VIP still falls through to the built-in rule
        let event = ex
            .extract(r#"[2024.03.01-10.00.01:000][  1]LogNet: Join request: Name="Bo" EOSID=8"#)
            .unwrap();
        assert_eq!(event.category, EventCategory::PlayerConnectIntent);
    }

    #[test]
    fn declared_field_without_group_is_rejected() {
        let err = ExtractRule::compile(
            EventCategory::Custom("broken".to_owned()),
            r"LogFoo: (?P<a>\d+)",
            vec![FieldSpec::new("b", FieldKind::Number)],
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::RuleValidation { .. }));
    }

    #[test]
    fn unparsable_number_means_no_match() {
        let rule = ExtractRule::compile(
            EventCategory::Custom("score".to_owned()),
            r"LogScore: (?P<points>\S+)",
            vec![FieldSpec::new("points", FieldKind::Number)],
        )
        .unwrap();
        let ex = Extractor::with_custom(vec![rule]).unwrap();
        assert!(ex.extract("[2024.03.01-10.00.00:000][  0]LogScore: lots").is_none());
        let event = ex.extract("[2024.03.01-10.00.00:000][  0]LogScore: 17").unwrap();
        assert_eq!(event.number("points"), Some(17.0));
    }

    #[test]
    fn first_matching_rule_owns_the_line() {
        let strict = ExtractRule::compile(
            EventCategory::Custom("score".to_owned()),
            r"LogScore: (?P<points>\S+)",
            vec![FieldSpec::new("points", FieldKind::Number)],
        )
        .unwrap();
        let loose = ExtractRule::compile(
            EventCategory::Custom("score_text".to_owned()),
            r"LogScore: (?P<points>\S+)",
            vec![FieldSpec::new("points", FieldKind::Text)],
        )
        .unwrap();
        let ex = Extractor::with_custom(vec![strict, loose]).unwrap();
        assert!(ex.extract("[2024.03.01-10.00.00:000][  0]LogScore: lots").is_none());
        let event = ex.extract("[2024.03.01-10.00.00:000][  0]LogScore: 3").unwrap();
        assert_eq!(event.category, EventCategory::Custom("score".to_owned()));
    }

    #[test]
    fn builtin_rule_count() {
        assert_eq!(extractor().rule_count(), 7);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn extract_arbitrary_text_does_not_panic(line in "\\PC{0,400}") {
                let _ = extractor().extract(&line);
            }

            #[test]
            fn lines_without_prefix_never_match(message in "[A-Za-z :=]{0,80}") {
                prop_assert!(extractor().extract(&message).is_none());
            }

            #[test]
            fn disconnect_keeps_player_key(player in "[A-Za-z0-9]{1,32}", ms in 0u32..1000) {
                let line = format!(
                    "[2024.03.01-10.00.00:{ms:03}][  0]LogNet: Player disconnected: EOSID={player}"
                );
                let event = extractor().extract(&line);
                prop_assert!(event.is_some());
                let event = event.unwrap();
                prop_assert_eq!(&event.category, &EventCategory::PlayerDisconnect);
                prop_assert_eq!(event.player_key(), Some(player.as_str()));
            }
        }
    }
}
