//! 내장 추출 규칙
//!
//! 모든 패턴은 타임스탬프 접두어 바로 뒤의 메시지 부분에 대해 시작 위치에
//! 고정되어 평가됩니다.
//!
//! ```text
//! [2024.03.01-10.00.01:000][  1]LogNet: Join request: Name="Bo" EOSID=0042
//! └──────── prefix ───────────┘└──────────── message ─────────────────────┘
//! ```

use super::event::EventCategory;
use super::{ExtractRule, FieldKind, FieldSpec};
use crate::error::IngestError;

const NUMBER: &str = r"-?\d+(?:\.\d+)?";

/// 내장 규칙 목록을 순서대로 컴파일합니다.
pub fn builtin_rules() -> Result<Vec<ExtractRule>, IngestError> {
    let text = |name: &str| FieldSpec::new(name, FieldKind::Text);
    let number = |name: &str| FieldSpec::new(name, FieldKind::Number);

    Ok(vec![
        ExtractRule::compile(
            EventCategory::PlayerConnectIntent,
            r#"LogNet: Join request: Name="(?P<name>[^"]*)" EOSID=(?P<player>\w+)"#,
            vec![text("name"), text("player")],
        )?,
        ExtractRule::compile(
            EventCategory::PlayerConnectConfirmed,
            r#"LogNet: Join succeeded: Name="(?P<name>[^"]*)" EOSID=(?P<player>\w+)"#,
            vec![text("name"), text("player")],
        )?,
        ExtractRule::compile(
            EventCategory::PlayerDisconnect,
            r"LogNet: Player disconnected: EOSID=(?P<player>\w+)",
            vec![text("player")],
        )?,
        ExtractRule::compile(
            EventCategory::PlayerKill,
            &format!(
                r#"LogCombat: Kill: Killer="(?P<killer>[^"]*)" Victim="(?P<victim>[^"]*)" Weapon="(?P<weapon>[^"]*)"(?: Distance=(?P<distance>{NUMBER}))?"#
            ),
            vec![text("killer"), text("victim"), text("weapon"), number("distance")],
        )?,
        ExtractRule::compile(
            EventCategory::Airdrop,
            &format!(
                r"LogWorld: Airdrop spawned at X=(?P<x>{NUMBER}) Y=(?P<y>{NUMBER}) Z=(?P<z>{NUMBER})"
            ),
            vec![number("x"), number("y"), number("z")],
        )?,
        ExtractRule::compile(
            EventCategory::WorldEvent,
            &format!(r"LogWorld: Event started: (?P<event>\w+)(?: at X=(?P<x>{NUMBER}) Y=(?P<y>{NUMBER}))?"),
            vec![text("event"), number("x"), number("y")],
        )?,
        ExtractRule::compile(
            EventCategory::ServerShutdown,
            r"LogWorld: Server shutting down",
            Vec::new(),
        )?,
    ])
}
