//! Prompt templates for the suggestion pipeline
//!
//! System prompts are fixed; user prompts are assembled per call from the
//! analysis context. Every structured call instructs the model to answer
//! with a single JSON object so the parser has one shape to validate.

use crate::context::{ChangedFile, PullRequestInfo};
use crate::pipeline::file::ClassifiedRule;
use crate::rules::Rule;
use crate::suggestion::Suggestion;

pub const CLASSIFY_RULES_SYSTEM: &str = r#"You are a code-review rule classifier. You receive a file diff and a list of candidate review rules. Decide which rules are genuinely violated by the change.

Be strict: only include a rule when the diff clearly violates it. Do not include rules that merely relate to the same topic.

OUTPUT FORMAT (JSON):
{
  "rules": [
    {"uuid": "<rule uuid>", "reason": "one-line reason the rule is violated"}
  ]
}

Return {"rules": []} when no rule is violated. Output ONLY the JSON object."#;

pub const UPDATE_SUGGESTIONS_SYSTEM: &str = r#"You are merging rule knowledge into pre-existing review suggestions. You receive suggestions produced by a generic reviewer plus the organization's review rules for this file.

For each suggestion decide one of:
- "unchanged": the suggestion is unrelated to any rule.
- "violated": the suggestion itself conflicts with a rule; silently correct its content. Do not cite the rule.
- "broken": the suggestion describes (or should describe) a rule violation; merge the rule's guidance into the content and list the violated rule ids.

OUTPUT FORMAT (JSON):
{
  "suggestions": [
    {
      "id": "<suggestion uuid>",
      "status": "unchanged" | "violated" | "broken",
      "updated_content": "full corrected content (omit for unchanged)",
      "violated_rule_ids": ["<rule uuid>"]
    }
  ]
}

Include every input suggestion exactly once. Output ONLY the JSON object."#;

pub const GENERATE_SUGGESTIONS_SYSTEM: &str = r#"You are a senior code reviewer enforcing organization review rules. You receive a file diff and the rules confirmed as violated, each with a reason.

Write one actionable suggestion per distinct violation. Quote the problematic code, explain the violation in plain language, and show the compliant alternative. Cite each violated rule by its uuid.

Do NOT duplicate any suggestion listed under "already covered" - those violations were resolved by an earlier merge step.

OUTPUT FORMAT (JSON):
{
  "suggestions": [
    {
      "file": "path of the affected file",
      "suggestion_content": "the full suggestion text",
      "line_start": 10,
      "line_end": 14,
      "broken_rule_ids": ["<rule uuid>"]
    }
  ]
}

Output ONLY the JSON object."#;

pub const GUARDIAN_SYSTEM: &str = r#"You are a review-suggestion guardian. You receive a file diff and candidate suggestions generated against organization rules. Reject any suggestion that misreads the diff, cites code that does not exist, or would not compile/behave as claimed.

OUTPUT FORMAT (JSON):
{
  "approved_ids": ["<suggestion uuid>"]
}

Approve by listing the suggestion id. Output ONLY the JSON object."#;

pub const PR_CHUNK_SYSTEM: &str = r#"You are a code reviewer evaluating pull-request-wide rules. You receive the pull request title and description, a set of changed files with their diffs, and the rules that apply to the whole pull request.

Report each rule violation you find. A rule may be violated several times across different files; report each occurrence separately.

OUTPUT FORMAT (JSON):
{
  "violations": [
    {
      "rule_uuid": "<rule uuid>",
      "primary_file": "path of the file where the violation is anchored",
      "related_files": ["other involved paths"],
      "reason": "why this violates the rule",
      "suggestion_content": "actionable suggestion text",
      "summary": "one-line summary"
    }
  ]
}

Return {"violations": []} when nothing is violated. Output ONLY the JSON object."#;

pub const EXTRACT_RULE_IDS_SYSTEM: &str = r#"You extract rule identifiers from review-suggestion text. Rule ids are UUIDs. Return every rule id the text refers to, and nothing else.

OUTPUT FORMAT (JSON):
{
  "rule_ids": ["<uuid>"]
}

Return {"rule_ids": []} when the text references no rule. Output ONLY the JSON object."#;

/// Render rules as a prompt block: uuid, title, severity and the rule text,
/// optionally followed by the rule's example snippets.
pub(crate) fn format_rules_block(rules: &[Rule], include_examples: bool) -> String {
    let mut block = String::new();
    for rule in rules {
        let severity = rule.severity.as_deref().unwrap_or("unspecified");
        block.push_str(&format!(
            "- uuid: {}\n  title: {}\n  severity: {}\n  rule: {}\n",
            rule.uuid, rule.title, severity, rule.rule_text
        ));
        if include_examples {
            for example in &rule.examples {
                let kind = if example.is_correct { "good" } else { "bad" };
                block.push_str(&format!("  {} example:\n```\n{}\n```\n", kind, example.snippet));
            }
        }
    }
    block
}

fn format_suggestions_block(suggestions: &[Suggestion]) -> String {
    suggestions
        .iter()
        .map(|s| {
            format!(
                "- id: {}\n  file: {}\n  content: {}",
                s.id, s.relevant_file, s.suggestion_content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_file_block(file: &ChangedFile) -> String {
    format!("File: {}\n\nDIFF:\n{}", file.path, file.diff)
}

pub(crate) fn classify_user_prompt(file: &ChangedFile, rules: &[Rule]) -> String {
    format!(
        "{}\n\nCANDIDATE RULES:\n{}",
        format_file_block(file),
        format_rules_block(rules, false)
    )
}

pub(crate) fn update_user_prompt(
    file: &ChangedFile,
    existing: &[Suggestion],
    rules: &[Rule],
) -> String {
    format!(
        "{}\n\nEXISTING SUGGESTIONS:\n{}\n\nRULES:\n{}",
        format_file_block(file),
        format_suggestions_block(existing),
        format_rules_block(rules, false)
    )
}

pub(crate) fn generate_user_prompt(
    file: &ChangedFile,
    classified: &[ClassifiedRule],
    already_covered: &[Suggestion],
    language: Option<&str>,
) -> String {
    let rules_block = classified
        .iter()
        .map(|c| {
            format!(
                "- uuid: {}\n  rule: {}\n  violation: {}",
                c.rule.uuid, c.rule.rule_text, c.reason
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let examples = format_rules_block(
        &classified.iter().map(|c| c.rule.clone()).collect::<Vec<_>>(),
        true,
    );

    let covered_section = if already_covered.is_empty() {
        String::new()
    } else {
        format!(
            "\n\nALREADY COVERED (do not duplicate):\n{}",
            format_suggestions_block(already_covered)
        )
    };
    let language_line = language
        .map(|l| format!("\nLanguage: {l}"))
        .unwrap_or_default();

    format!(
        "{}{}\n\nVIOLATED RULES:\n{}\n\nRULE DETAILS:\n{}{}",
        format_file_block(file),
        language_line,
        rules_block,
        examples,
        covered_section
    )
}

pub(crate) fn guardian_user_prompt(file: &ChangedFile, suggestions: &[Suggestion]) -> String {
    format!(
        "{}\n\nCANDIDATE SUGGESTIONS:\n{}",
        format_file_block(file),
        format_suggestions_block(suggestions)
    )
}

pub(crate) fn chunk_user_prompt(
    pull_request: &PullRequestInfo,
    files: &[ChangedFile],
    rules: &[Rule],
) -> String {
    let files_block = files
        .iter()
        .map(|f| format!("=== {} ===\n{}", f.path, f.diff))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Pull request #{}: {}\n\n{}\n\nCHANGED FILES:\n{}\n\nPULL-REQUEST RULES:\n{}",
        pull_request.number,
        pull_request.title,
        pull_request.description,
        files_block,
        format_rules_block(rules, false)
    )
}

pub(crate) fn extract_user_prompt(content: &str) -> String {
    format!("Extract the rule ids referenced by this suggestion:\n\n{content}")
}
