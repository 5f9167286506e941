//! Rule catalog data model
//!
//! Rules are authored in an external rule-management service; this engine
//! only reads them. Severity is kept as the raw authored string so that
//! unrecognized values can fail open during severity-floor filtering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel repository id for organization-wide rules.
pub const GLOBAL_REPOSITORY_ID: &str = "global";

/// Rule severity, ranked low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse an authored severity string, case-insensitively.
    /// Anything unrecognized yields `None` so callers can fail open.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Whether a rule is evaluated per changed file or once per pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    File,
    PullRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Active,
    Inactive,
    Deleted,
}

/// Where a rule came from: authored by a user or imported from the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOrigin {
    User,
    Library,
}

/// Inheritance controls for rules defined above the queried scope.
///
/// A rule is inheritable by default. `include`/`exclude` hold directory or
/// repository ids the rule is explicitly limited to or kept out of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleInheritance {
    #[serde(default = "default_inheritable")]
    pub inheritable: bool,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_inheritable() -> bool {
    true
}

impl Default for RuleInheritance {
    fn default() -> Self {
        Self {
            inheritable: true,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// A good/bad example snippet attached to a rule, shown to the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExample {
    pub snippet: String,
    pub is_correct: bool,
}

/// An organization-authored natural-language review policy.
///
/// Immutable once classified into an analysis run; the engine never writes
/// rules back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub uuid: Uuid,
    pub title: String,
    pub rule_text: String,
    /// Raw authored severity ("low".."critical"); parsed lazily, fail-open.
    #[serde(default)]
    pub severity: Option<String>,
    pub scope: RuleScope,
    #[serde(default)]
    pub path_pattern: Option<String>,
    /// Owning repository id, or [`GLOBAL_REPOSITORY_ID`].
    pub repository_id: String,
    #[serde(default)]
    pub directory_id: Option<String>,
    #[serde(default)]
    pub inheritance: RuleInheritance,
    pub status: RuleStatus,
    pub origin: RuleOrigin,
    #[serde(default)]
    pub examples: Vec<RuleExample>,
    #[serde(default)]
    pub external_references: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    pub fn is_global(&self) -> bool {
        self.repository_id == GLOBAL_REPOSITORY_ID
    }

    /// Parsed severity; `None` when missing or unrecognized.
    pub fn parsed_severity(&self) -> Option<Severity> {
        self.severity.as_deref().and_then(Severity::parse)
    }

    /// Whether this rule applies to `file_path`.
    ///
    /// A rule without a pattern matches every file. With a pattern, the file
    /// must satisfy the glob, or the pattern must be exactly the file's
    /// containing directory.
    pub fn matches_file(&self, file_path: &str) -> bool {
        let Some(pattern) = self.path_pattern.as_deref() else {
            return true;
        };
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return true;
        }
        if let Ok(glob) = glob::Pattern::new(pattern) {
            if glob.matches(file_path) {
                return true;
            }
        }
        containing_directory(file_path) == Some(pattern)
    }
}

fn containing_directory(file_path: &str) -> Option<&str> {
    file_path.rsplit_once('/').map(|(dir, _)| dir)
}
