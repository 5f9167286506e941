//! Per-invocation analysis context
//!
//! Read-only snapshot handed to the orchestrators: one instance per analysis
//! invocation, never shared across concurrent analyses.

use crate::chunker::estimate_tokens;
use crate::rules::{Rule, Severity};
use serde::{Deserialize, Serialize};

/// One changed file in the pull request under review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    /// Unified diff of the change.
    pub diff: String,
    /// Full post-change contents; stripped before PR-level chunking.
    #[serde(default)]
    pub content: Option<String>,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, diff: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            diff: diff.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Copy of this record with the file body dropped. The PR-level pipeline
    /// chunks on diff cost only.
    pub fn without_content(&self) -> ChangedFile {
        ChangedFile {
            path: self.path.clone(),
            diff: self.diff.clone(),
            content: None,
        }
    }

    /// Estimated token cost of this record as serialized into a prompt.
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.path)
            + estimate_tokens(&self.diff)
            + self.content.as_deref().map(estimate_tokens).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub id: String,
    pub name: String,
}

/// Caller-supplied override of which provider/model to use instead of the
/// service default. Applied to the primary tier only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByokOverride {
    pub provider: String,
    pub model: String,
}

/// Read-only snapshot for one analysis invocation.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub organization_id: String,
    pub team_id: String,
    pub pull_request: PullRequestInfo,
    pub repository: RepositoryInfo,
    pub directory_id: Option<String>,
    /// Full rule catalog for the organization; the resolver narrows it.
    pub rules: Vec<Rule>,
    /// Minimum severity a rule must have to participate in this run.
    pub severity_floor: Option<Severity>,
    pub language: Option<String>,
    pub byok: Option<ByokOverride>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn context(repository_id: &str, rules: Vec<Rule>) -> AnalysisContext {
        AnalysisContext {
            organization_id: "org-1".to_string(),
            team_id: "team-1".to_string(),
            pull_request: PullRequestInfo {
                number: 42,
                title: "Add user handler".to_string(),
                description: "Adds the new user endpoint".to_string(),
            },
            repository: RepositoryInfo {
                id: repository_id.to_string(),
                name: "example-repo".to_string(),
            },
            directory_id: None,
            rules,
            severity_floor: None,
            language: Some("typescript".to_string()),
            byok: None,
        }
    }
}
