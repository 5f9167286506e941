//! Suggestions and violations produced by the pipeline
//!
//! A `Suggestion` is the engine's output unit; a `RuleViolations` record is
//! the intermediate produced by per-chunk analysis before violations are
//! merged across chunks and mapped one-to-one onto suggestions.

use crate::rules::{Rule, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Label applied to suggestions that originate from a broken rule.
pub const RULE_LABEL: &str = "kody_rules";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// An actionable review suggestion.
///
/// `severity` is derived from the broken rules, never authored directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub suggestion_content: String,
    pub relevant_file: String,
    #[serde(default)]
    pub lines: Option<LineRange>,
    pub label: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub broken_rule_ids: Vec<Uuid>,
}

impl Suggestion {
    pub fn new(
        suggestion_content: impl Into<String>,
        relevant_file: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            suggestion_content: suggestion_content.into(),
            relevant_file: relevant_file.into(),
            lines: None,
            label: label.into(),
            severity: None,
            broken_rule_ids: Vec::new(),
        }
    }

    pub fn with_lines(mut self, start: u32, end: u32) -> Self {
        self.lines = Some(LineRange { start, end });
        self
    }

    pub fn with_broken_rules(mut self, ids: Vec<Uuid>) -> Self {
        self.broken_rule_ids = ids;
        self
    }

    pub fn is_rule_based(&self) -> bool {
        self.label == RULE_LABEL
    }
}

/// One violation reported by a classification or chunk-analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationInstance {
    pub primary_file: String,
    #[serde(default)]
    pub related_files: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub suggestion_content: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// All violation instances attributed to one rule.
#[derive(Debug, Clone)]
pub struct RuleViolations {
    pub rule_id: Uuid,
    pub violations: Vec<ViolationInstance>,
}

/// Merge violation batches across chunks: group by rule uuid and concatenate
/// each rule's violation list. Lists are unioned, never overwritten; rule
/// order follows first appearance.
pub fn merge_rule_violations(batches: Vec<Vec<RuleViolations>>) -> Vec<RuleViolations> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut by_rule: HashMap<Uuid, Vec<ViolationInstance>> = HashMap::new();

    for batch in batches {
        for record in batch {
            if !by_rule.contains_key(&record.rule_id) {
                order.push(record.rule_id);
            }
            by_rule
                .entry(record.rule_id)
                .or_default()
                .extend(record.violations);
        }
    }

    order
        .into_iter()
        .map(|rule_id| RuleViolations {
            rule_id,
            violations: by_rule.remove(&rule_id).unwrap_or_default(),
        })
        .collect()
}

/// Set each suggestion's severity from the first listed broken rule id that
/// resolves in the catalog. Deliberately the first, not the maximum across
/// all listed rules.
pub fn attach_severity(suggestions: &mut [Suggestion], catalog: &[Rule]) {
    for suggestion in suggestions.iter_mut() {
        suggestion.severity = suggestion
            .broken_rule_ids
            .iter()
            .find_map(|id| catalog.iter().find(|rule| rule.uuid == *id))
            .and_then(Rule::parsed_severity);
    }
}

/// Final result shape shared by file-level and PR-level analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub code_suggestions: Vec<Suggestion>,
}
