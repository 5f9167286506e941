//! Reference linking for rule-based suggestions
//!
//! Post-processes suggestion text: rule identifiers embedded in the content
//! become markdown links to the rule's settings page. Extraction is
//! syntactic first (canonical UUID pattern), then falls back to ids already
//! attached to the suggestion, and only then to a small extraction model
//! call. Lookup failures skip that one id and keep going.

use crate::catalog::RuleCatalog;
use crate::executor::{ModelCallExecutor, UsageTracker};
use crate::pipeline::prompts;
use crate::provider::PromptRequest;
use crate::rules::{Rule, GLOBAL_REPOSITORY_ID};
use crate::suggestion::Suggestion;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::warn;
use uuid::Uuid;

const UUID_PATTERN: &str =
    "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(UUID_PATTERN).expect("canonical UUID pattern is valid"))
}

pub struct ReferenceLinker<'a> {
    catalog: &'a dyn RuleCatalog,
    settings_base_url: &'a str,
}

impl<'a> ReferenceLinker<'a> {
    pub fn new(catalog: &'a dyn RuleCatalog, settings_base_url: &'a str) -> Self {
        Self {
            catalog,
            settings_base_url,
        }
    }

    /// Resolve rule ids in each rule-based suggestion into markdown links.
    /// Suggestions with other labels pass through untouched.
    pub async fn linkify(
        &self,
        mut suggestions: Vec<Suggestion>,
        executor: &ModelCallExecutor,
        tracker: &mut UsageTracker,
    ) -> Vec<Suggestion> {
        for suggestion in suggestions.iter_mut() {
            if !suggestion.is_rule_based() {
                continue;
            }
            self.link_suggestion(suggestion, executor, tracker).await;
        }
        suggestions
    }

    async fn link_suggestion(
        &self,
        suggestion: &mut Suggestion,
        executor: &ModelCallExecutor,
        tracker: &mut UsageTracker,
    ) {
        let mut ids = extract_rule_ids(&suggestion.suggestion_content);
        if ids.is_empty() {
            if !suggestion.broken_rule_ids.is_empty() {
                // An earlier pass already linked these ids; nothing to anchor.
                let already_linked = suggestion.broken_rule_ids.iter().any(|id| {
                    suggestion
                        .suggestion_content
                        .contains(&format!("kody-rules/{id}"))
                });
                if already_linked {
                    return;
                }
                // Give the attached ids a textual anchor to link against.
                let listed = suggestion
                    .broken_rule_ids
                    .iter()
                    .map(|id| format!("`{id}`"))
                    .collect::<Vec<_>>()
                    .join(", ");
                suggestion
                    .suggestion_content
                    .push_str(&format!("\n\nKody Rules violated: {listed}"));
                ids = suggestion.broken_rule_ids.clone();
            } else {
                ids = self
                    .extract_via_model(&suggestion.suggestion_content, executor, tracker)
                    .await;
            }
        }

        for id in ids {
            let rule = match self.catalog.find_rule_by_id(id).await {
                Ok(Some(rule)) => rule,
                Ok(None) => {
                    warn!(rule = %id, "rule not found during linking; skipping");
                    continue;
                }
                Err(err) => {
                    warn!(rule = %id, error = %err, "rule lookup failed during linking; skipping");
                    continue;
                }
            };
            let link = format!(
                "[{}]({})",
                escape_markdown(&rule.title),
                self.rule_settings_url(&rule)
            );
            suggestion.suggestion_content =
                replace_rule_id(&suggestion.suggestion_content, &id.to_string(), &link);
        }
    }

    fn rule_settings_url(&self, rule: &Rule) -> String {
        let scope_segment = if rule.is_global() {
            GLOBAL_REPOSITORY_ID
        } else {
            rule.repository_id.as_str()
        };
        format!(
            "{}/{}/kody-rules/{}",
            self.settings_base_url.trim_end_matches('/'),
            scope_segment,
            rule.uuid
        )
    }

    /// Semantic extraction: ask a small model call for the referenced ids.
    /// Only reached when syntactic extraction and attached ids both yield
    /// nothing; failure degrades to an empty list.
    async fn extract_via_model(
        &self,
        content: &str,
        executor: &ModelCallExecutor,
        tracker: &mut UsageTracker,
    ) -> Vec<Uuid> {
        let request = PromptRequest::new(
            prompts::EXTRACT_RULE_IDS_SYSTEM,
            prompts::extract_user_prompt(content),
        )
        .json()
        .tagged("rule_id_extractor");

        match executor.execute_structured::<ExtractResponseJson>(&request).await {
            Ok((parsed, usage)) => {
                tracker.extend(usage);
                parsed.map(|p| p.rule_ids).unwrap_or_default()
            }
            Err(err) => {
                warn!(error = %err, "rule id extraction call failed");
                Vec::new()
            }
        }
    }
}

#[derive(Deserialize)]
struct ExtractResponseJson {
    #[serde(default)]
    rule_ids: Vec<Uuid>,
}

/// Syntactic extraction: canonical UUIDs in the content, skipping ids that
/// are already part of a markdown link or URL so a second linking pass is a
/// no-op.
pub(crate) fn extract_rule_ids(content: &str) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for found in uuid_regex().find_iter(content) {
        let preceding = content[..found.start()].chars().last();
        if matches!(preceding, Some('/') | Some('(')) {
            continue;
        }
        if let Ok(id) = Uuid::parse_str(found.as_str()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Replace a raw rule id with its link, preferring the id wrapped in single
/// backticks, then triple backticks, then a bare substring. Replacements are
/// plain string substitutions, so the id value cannot inject a pattern.
pub(crate) fn replace_rule_id(content: &str, id: &str, link: &str) -> String {
    let single = format!("`{id}`");
    let triple = format!("```{id}```");
    if content.contains(&single) && !content.contains(&triple) {
        content.replace(&single, link)
    } else if content.contains(&triple) {
        content.replace(&triple, link)
    } else {
        content.replace(id, link)
    }
}

/// Escape markdown-sensitive characters in link text.
pub(crate) fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '[' | ']' | '(' | ')' | '*' | '_' | '`' | '~' | '|' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
