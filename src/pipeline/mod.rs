//! Multi-stage suggestion pipeline
//!
//! `file` runs the per-file classify → merge → generate → guardian flow;
//! `pr` runs the pull-request-wide chunked flow. Both share the prompt
//! templates, the response parsers, and the external-reference gate below.

pub mod file;
pub mod parse;
pub mod pr;
pub mod prompts;

use crate::catalog::ReferenceLoader;
use crate::context::AnalysisContext;
use crate::rules::Rule;
use tracing::warn;

/// Drop candidate rules whose declared external references cannot be loaded.
///
/// A rule with no declared references always passes. A rule that declares
/// references is excluded when the loader fails, is absent, or returns no
/// entry for it - never silently treated as reference-free.
pub(crate) async fn gate_external_references(
    loader: Option<&dyn ReferenceLoader>,
    mut candidates: Vec<Rule>,
    context: &AnalysisContext,
) -> Vec<Rule> {
    if candidates.iter().all(|r| r.external_references.is_empty()) {
        return candidates;
    }

    let Some(loader) = loader else {
        candidates.retain(|rule| {
            if rule.external_references.is_empty() {
                true
            } else {
                warn!(rule = %rule.uuid, "no reference loader configured; excluding rule with declared references");
                false
            }
        });
        return candidates;
    };

    match loader.load_references(&candidates, context).await {
        Ok(loaded) => {
            candidates.retain(|rule| {
                if rule.external_references.is_empty() || loaded.contains_key(&rule.uuid) {
                    true
                } else {
                    warn!(rule = %rule.uuid, "external references failed to load; excluding rule");
                    false
                }
            });
        }
        Err(err) => {
            warn!(error = %err, "reference loading failed; excluding all rules with declared references");
            candidates.retain(|rule| rule.external_references.is_empty());
        }
    }
    candidates
}
