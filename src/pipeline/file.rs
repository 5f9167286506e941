//! Per-file analysis orchestration
//!
//! States per file: no-rules → classify → {merge, generate} → optional
//! guardian → done. The classifier and the updater run concurrently and are
//! joined; a provider failure in either aborts the file's analysis, while a
//! parse failure degrades that call to an empty result.

use crate::catalog::{ReferenceLoader, RuleCatalog};
use crate::config::EngineConfig;
use crate::context::{AnalysisContext, ChangedFile};
use crate::executor::{ModelCallExecutor, UsageRecord, UsageTracker};
use crate::linker::ReferenceLinker;
use crate::pipeline::{gate_external_references, prompts};
use crate::provider::PromptRequest;
use crate::resolver;
use crate::rules::{Rule, RuleScope};
use crate::suggestion::{attach_severity, AnalysisResult, Suggestion, RULE_LABEL};
use serde::Deserialize;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// A candidate rule the classifier confirmed, with its one-line reason.
#[derive(Debug, Clone)]
pub struct ClassifiedRule {
    pub rule: Rule,
    pub reason: String,
}

#[derive(Deserialize)]
struct ClassifyResponseJson {
    #[serde(default)]
    rules: Vec<ClassifiedRuleJson>,
}

#[derive(Deserialize)]
struct ClassifiedRuleJson {
    uuid: Uuid,
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct UpdateResponseJson {
    #[serde(default)]
    suggestions: Vec<UpdatedSuggestionJson>,
}

#[derive(Deserialize)]
struct UpdatedSuggestionJson {
    id: Uuid,
    status: String,
    #[serde(default)]
    updated_content: Option<String>,
    #[serde(default)]
    violated_rule_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct GenerateResponseJson {
    #[serde(default)]
    suggestions: Vec<GeneratedSuggestionJson>,
}

#[derive(Deserialize)]
struct GeneratedSuggestionJson {
    #[serde(default)]
    file: Option<String>,
    suggestion_content: String,
    #[serde(default)]
    line_start: Option<u32>,
    #[serde(default)]
    line_end: Option<u32>,
    #[serde(default)]
    broken_rule_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct GuardianResponseJson {
    #[serde(default)]
    approved_ids: Vec<Uuid>,
}

pub struct FileAnalysisOrchestrator<'a> {
    executor: &'a ModelCallExecutor,
    catalog: &'a dyn RuleCatalog,
    reference_loader: Option<&'a dyn ReferenceLoader>,
    config: &'a EngineConfig,
}

impl<'a> FileAnalysisOrchestrator<'a> {
    pub fn new(
        executor: &'a ModelCallExecutor,
        catalog: &'a dyn RuleCatalog,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            executor,
            catalog,
            reference_loader: None,
            config,
        }
    }

    pub fn with_reference_loader(mut self, loader: &'a dyn ReferenceLoader) -> Self {
        self.reference_loader = Some(loader);
        self
    }

    /// Analyze one changed file against its applicable file-scoped rules.
    ///
    /// Returns the file's suggestions plus the usage tracker owned by this
    /// invocation.
    pub async fn analyze(
        &self,
        context: &AnalysisContext,
        file: &ChangedFile,
        existing_suggestions: &[Suggestion],
    ) -> anyhow::Result<(AnalysisResult, UsageTracker)> {
        let span = info_span!(
            "file_analysis",
            file = %file.path,
            pull_request = context.pull_request.number
        );
        self.analyze_inner(context, file, existing_suggestions)
            .instrument(span)
            .await
    }

    async fn analyze_inner(
        &self,
        context: &AnalysisContext,
        file: &ChangedFile,
        existing_suggestions: &[Suggestion],
    ) -> anyhow::Result<(AnalysisResult, UsageTracker)> {
        let mut tracker = UsageTracker::new();
        let executor = self.executor.clone().with_byok(context.byok.as_ref());

        let file_rules: Vec<Rule> = context
            .rules
            .iter()
            .filter(|rule| rule.scope == RuleScope::File)
            .cloned()
            .collect();
        let candidates = resolver::resolve_for_file(
            &file_rules,
            &file.path,
            &context.repository.id,
            context.directory_id.as_deref(),
            context.severity_floor,
            &self.config.limits,
        );
        let candidates =
            gate_external_references(self.reference_loader, candidates, context).await;

        if candidates.is_empty() {
            // Terminal state: no model calls for files with no applicable rules.
            return Ok((AnalysisResult::default(), tracker));
        }

        let (classified_result, updated_result) = tokio::join!(
            self.classify(&executor, file, &candidates),
            self.update_existing(&executor, file, existing_suggestions, &candidates),
        );
        let (classified, classify_usage) = classified_result?;
        let (updated, update_usage) = updated_result?;
        tracker.extend(classify_usage);
        tracker.extend(update_usage);

        let mut combined = if classified.is_empty() {
            // Short-circuit: nothing actually violated, keep only the merge output.
            updated
        } else {
            let mut generated = {
                let (suggestions, usage) = self
                    .generate(&executor, context, file, &classified, &updated)
                    .await?;
                tracker.extend(usage);
                suggestions
            };
            if self.config.guardian_enabled && !generated.is_empty() {
                generated = self
                    .guardian_filter(&executor, file, generated, &mut tracker)
                    .await;
            }
            generated.extend(updated);
            generated
        };

        attach_severity(&mut combined, &context.rules);

        let linker = ReferenceLinker::new(self.catalog, &self.config.settings_base_url);
        let code_suggestions = linker.linkify(combined, &executor, &mut tracker).await;

        Ok((AnalysisResult { code_suggestions }, tracker))
    }

    /// Classifier call: which candidate rules does the diff actually violate.
    async fn classify(
        &self,
        executor: &ModelCallExecutor,
        file: &ChangedFile,
        candidates: &[Rule],
    ) -> anyhow::Result<(Vec<ClassifiedRule>, Vec<UsageRecord>)> {
        let request = PromptRequest::new(
            prompts::CLASSIFY_RULES_SYSTEM,
            prompts::classify_user_prompt(file, candidates),
        )
        .json()
        .tagged("file_classifier");

        let (parsed, usage) = executor
            .execute_structured::<ClassifyResponseJson>(&request)
            .await?;

        let mut classified = Vec::new();
        for entry in parsed.map(|p| p.rules).unwrap_or_default() {
            match candidates.iter().find(|rule| rule.uuid == entry.uuid) {
                Some(rule) => classified.push(ClassifiedRule {
                    rule: rule.clone(),
                    reason: entry.reason,
                }),
                None => {
                    warn!(rule = %entry.uuid, "classifier returned a rule outside the candidate set; ignoring");
                }
            }
        }
        Ok((classified, usage))
    }

    /// Updater call: reconcile pre-existing generic suggestions with the
    /// candidate rules. Skipped entirely when there is nothing to update.
    async fn update_existing(
        &self,
        executor: &ModelCallExecutor,
        file: &ChangedFile,
        existing: &[Suggestion],
        candidates: &[Rule],
    ) -> anyhow::Result<(Vec<Suggestion>, Vec<UsageRecord>)> {
        if existing.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let request = PromptRequest::new(
            prompts::UPDATE_SUGGESTIONS_SYSTEM,
            prompts::update_user_prompt(file, existing, candidates),
        )
        .json()
        .tagged("suggestion_updater");

        let (parsed, usage) = executor
            .execute_structured::<UpdateResponseJson>(&request)
            .await?;

        let Some(parsed) = parsed else {
            return Ok((Vec::new(), usage));
        };

        let mut updated = Vec::new();
        for entry in parsed.suggestions {
            let Some(original) = existing.iter().find(|s| s.id == entry.id) else {
                warn!(suggestion = %entry.id, "updater returned an unknown suggestion id; ignoring");
                continue;
            };
            let mut suggestion = original.clone();
            match entry.status.as_str() {
                "unchanged" => {}
                "violated" => {
                    // Silently corrected: new content, no rule id retained.
                    if let Some(content) = entry.updated_content {
                        suggestion.suggestion_content = content;
                    }
                }
                "broken" => {
                    if let Some(content) = entry.updated_content {
                        suggestion.suggestion_content = content;
                    }
                    suggestion.broken_rule_ids = entry.violated_rule_ids;
                    suggestion.label = RULE_LABEL.to_string();
                }
                other => {
                    warn!(suggestion = %entry.id, status = other, "updater returned an unknown status; keeping suggestion unchanged");
                }
            }
            updated.push(suggestion);
        }
        Ok((updated, usage))
    }

    /// Generate new suggestions for the classified rules, with the updater's
    /// output supplied as context so merge-resolved violations are not
    /// duplicated.
    async fn generate(
        &self,
        executor: &ModelCallExecutor,
        context: &AnalysisContext,
        file: &ChangedFile,
        classified: &[ClassifiedRule],
        already_covered: &[Suggestion],
    ) -> anyhow::Result<(Vec<Suggestion>, Vec<UsageRecord>)> {
        let request = PromptRequest::new(
            prompts::GENERATE_SUGGESTIONS_SYSTEM,
            prompts::generate_user_prompt(
                file,
                classified,
                already_covered,
                context.language.as_deref(),
            ),
        )
        .json()
        .tagged("suggestion_generator");

        let (parsed, usage) = executor
            .execute_structured::<GenerateResponseJson>(&request)
            .await?;

        let suggestions = parsed
            .map(|p| p.suggestions)
            .unwrap_or_default()
            .into_iter()
            .map(|entry| {
                let mut suggestion = Suggestion::new(
                    entry.suggestion_content,
                    entry.file.unwrap_or_else(|| file.path.clone()),
                    RULE_LABEL,
                )
                .with_broken_rules(entry.broken_rule_ids);
                if let (Some(start), Some(end)) = (entry.line_start, entry.line_end) {
                    suggestion = suggestion.with_lines(start, end);
                }
                suggestion
            })
            .collect();
        Ok((suggestions, usage))
    }

    /// Guardian pass: gate-check generated suggestions. Strictly advisory -
    /// any failure keeps the unvalidated set.
    async fn guardian_filter(
        &self,
        executor: &ModelCallExecutor,
        file: &ChangedFile,
        generated: Vec<Suggestion>,
        tracker: &mut UsageTracker,
    ) -> Vec<Suggestion> {
        let request = PromptRequest::new(
            prompts::GUARDIAN_SYSTEM,
            prompts::guardian_user_prompt(file, &generated),
        )
        .json()
        .tagged("suggestion_guardian");

        match executor
            .execute_structured::<GuardianResponseJson>(&request)
            .await
        {
            Ok((Some(parsed), usage)) => {
                tracker.extend(usage);
                generated
                    .into_iter()
                    .filter(|s| parsed.approved_ids.contains(&s.id))
                    .collect()
            }
            Ok((None, usage)) => {
                tracker.extend(usage);
                warn!("guardian response unparseable; keeping unvalidated suggestions");
                generated
            }
            Err(err) => {
                warn!(error = %err, "guardian call failed; keeping unvalidated suggestions");
                generated
            }
        }
    }
}
