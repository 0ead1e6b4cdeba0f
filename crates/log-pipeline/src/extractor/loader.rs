//! 사용자 규칙 로더 -- YAML 규칙 파일을 읽어 추출 규칙으로 컴파일합니다.
//!
//! # 파일 형식
//! ```yaml
//! rules:
//!   - category: bounty_claimed
//!     pattern: 'LogBounty: Claimed by EOSID=(?P<player>\w+) Reward=(?P<reward>\d+)'
//!     fields:
//!       - name: player
//!       - name: reward
//!         kind: number
//! ```
//!
//! `pattern`은 타임스탬프 접두어 뒤의 메시지에 대해 시작 위치에 고정됩니다.
//! 규칙은 파일 순서대로 내장 규칙보다 먼저 평가됩니다.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use super::event::EventCategory;
use super::{ExtractRule, FieldSpec};
use crate::error::IngestError;

const MAX_RULE_FILE_SIZE: u64 = 1024 * 1024;
const MAX_RULES_COUNT: usize = 1_000;
const MAX_CATEGORY_LEN: usize = 64;

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RuleDefinition>,
}

/// YAML 규칙 정의 (컴파일 전)
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefinition {
    /// 카테고리 이름 (`custom:<category>`로 노출)
    pub category: String,
    /// 메시지 패턴
    pub pattern: String,
    /// 필드 매핑
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl RuleDefinition {
    /// 규칙을 검증하고 컴파일합니다.
    pub fn compile(&self) -> Result<ExtractRule, IngestError> {
        if self.category.is_empty() {
            return Err(IngestError::RuleValidation {
                rule_id: "(empty)".to_owned(),
                reason: "category must not be empty".to_owned(),
            });
        }
        if self.category.len() > MAX_CATEGORY_LEN {
            return Err(IngestError::RuleValidation {
                rule_id: self.category.clone(),
                reason: format!("category must not exceed {MAX_CATEGORY_LEN} characters"),
            });
        }
        if self.pattern.trim().is_empty() {
            return Err(IngestError::RuleValidation {
                rule_id: self.category.clone(),
                reason: "pattern must not be empty".to_owned(),
            });
        }

        ExtractRule::compile(
            EventCategory::Custom(self.category.clone()),
            &self.pattern,
            self.fields.clone(),
        )
        .map_err(|e| match e {
            IngestError::Regex(err) => IngestError::RuleValidation {
                rule_id: self.category.clone(),
                reason: format!("invalid pattern: {err}"),
            },
            other => other,
        })
    }
}

/// 규칙 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// 규칙 파일을 로드합니다.
    ///
    /// # Errors
    /// - 파일을 읽을 수 없거나 너무 큰 경우
    /// - YAML 파싱 또는 규칙 검증 실패
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Vec<ExtractRule>, IngestError> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| IngestError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(IngestError::RuleLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IngestError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file: {e}"),
            })?;

        let rules = Self::parse_yaml(&content, &path.display().to_string())?;
        tracing::info!(path = %path.display(), count = rules.len(), "loaded extraction rules");
        Ok(rules)
    }

    /// YAML 문자열을 파싱하여 규칙을 컴파일합니다.
    ///
    /// 중복 카테고리는 경고 후 뒤의 것을 건너뜁니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<Vec<ExtractRule>, IngestError> {
        let file: RulesFile = serde_yaml::from_str(yaml_str).map_err(|e| IngestError::RuleLoad {
            path: source.to_owned(),
            reason: format!("YAML parse error: {e}"),
        })?;

        if file.rules.len() > MAX_RULES_COUNT {
            return Err(IngestError::RuleLoad {
                path: source.to_owned(),
                reason: format!("too many rules: max {MAX_RULES_COUNT}"),
            });
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(file.rules.len());
        for definition in &file.rules {
            if !seen.insert(definition.category.clone()) {
                tracing::warn!(
                    category = %definition.category,
                    path = source,
                    "duplicate rule category, skipping"
                );
                continue;
            }
            rules.push(definition.compile()?);
        }
        Ok(rules)
    }
}
