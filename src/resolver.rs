//! Hierarchical rule scope resolution
//!
//! Given the full rule catalog and a target (repository, optional directory,
//! optionally a specific changed file), produce the deduplicated, ordered,
//! cap-limited subset of applicable rules.
//!
//! Resolution order: directory-matched rules, then repository-matched, then
//! global. The bucket order decides which duplicate wins; it is not
//! exclusivity, and all three buckets may contribute.

use crate::config::RuleLimits;
use crate::rules::{Rule, Severity};
use std::collections::HashSet;
use tracing::warn;

/// Default cap on rules per analysis for capacity-limited deployments.
pub const DEFAULT_MAX_RULES: usize = 10;

/// Resolve applicable rules for a repository/directory target.
///
/// Used by the PR-level pipeline, where no per-file path filter applies.
pub fn resolve(
    rules: &[Rule],
    repository_id: &str,
    directory_id: Option<&str>,
    min_severity: Option<Severity>,
    limits: &RuleLimits,
) -> Vec<Rule> {
    let active: Vec<&Rule> = rules.iter().filter(|r| r.is_active()).collect();
    finish(active, repository_id, directory_id, min_severity, limits)
}

/// Resolve applicable rules for one changed file.
///
/// Applies the path filter and the inheritance filter before bucketing.
pub fn resolve_for_file(
    rules: &[Rule],
    file_path: &str,
    repository_id: &str,
    directory_id: Option<&str>,
    min_severity: Option<Severity>,
    limits: &RuleLimits,
) -> Vec<Rule> {
    let target_id = directory_id.unwrap_or(repository_id);
    let candidates: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.is_active())
        .filter(|r| r.matches_file(file_path))
        .filter(|r| inheritance_allows(r, repository_id, directory_id, target_id))
        .collect();
    finish(candidates, repository_id, directory_id, min_severity, limits)
}

/// Bucket, dedup, severity-filter, order and cap the candidate set.
fn finish(
    candidates: Vec<&Rule>,
    repository_id: &str,
    directory_id: Option<&str>,
    min_severity: Option<Severity>,
    limits: &RuleLimits,
) -> Vec<Rule> {
    let mut directory_bucket: Vec<&Rule> = Vec::new();
    let mut repository_bucket: Vec<&Rule> = Vec::new();
    let mut global_bucket: Vec<&Rule> = Vec::new();

    for rule in candidates {
        if let (Some(target_dir), Some(rule_dir)) = (directory_id, rule.directory_id.as_deref()) {
            if rule_dir == target_dir {
                directory_bucket.push(rule);
            }
            // A directory-scoped rule matches only an identical directory id.
            continue;
        }
        if rule.directory_id.is_some() {
            // Repository-level query rejects any rule carrying a directory id.
            continue;
        }
        if rule.is_global() {
            global_bucket.push(rule);
        } else if rule.repository_id == repository_id {
            repository_bucket.push(rule);
        }
    }

    // Floors at the lowest level filter nothing.
    let floor = min_severity.filter(|f| *f > Severity::Low);

    let mut seen_texts: HashSet<&str> = HashSet::new();
    let mut resolved: Vec<Rule> = Vec::new();
    for rule in directory_bucket
        .into_iter()
        .chain(repository_bucket)
        .chain(global_bucket)
    {
        // Dedup by rule text happens before the severity filter, so a
        // higher-priority duplicate dropped by the floor still shadows
        // lower-priority copies.
        if !seen_texts.insert(rule.rule_text.as_str()) {
            continue;
        }
        if let Some(floor) = floor {
            match rule.parsed_severity() {
                Some(severity) if severity < floor => continue,
                Some(_) => {}
                None => {
                    warn!(
                        rule = %rule.uuid,
                        severity = ?rule.severity,
                        "rule severity missing or unrecognized; keeping (fail-open)"
                    );
                }
            }
        }
        resolved.push(rule.clone());
    }

    resolved.sort_by_key(|rule| rule.created_at);

    if !limits.unlimited {
        resolved.truncate(limits.max_rules);
    }
    resolved
}

/// Inheritance gate for per-file matching.
///
/// Rules scoped exactly to the queried directory, or defined at the queried
/// repository with no directory, are never inherited and bypass the gate.
/// Everything else reaches the target through inheritance: the rule must be
/// inheritable, the target id must not be in its exclude set, and when an
/// include set is present the target id must appear in it.
fn inheritance_allows(
    rule: &Rule,
    repository_id: &str,
    directory_id: Option<&str>,
    target_id: &str,
) -> bool {
    let direct = match directory_id {
        Some(dir) => rule.directory_id.as_deref() == Some(dir),
        None => {
            rule.directory_id.is_none() && !rule.is_global() && rule.repository_id == repository_id
        }
    };
    if direct {
        return true;
    }

    let inheritance = &rule.inheritance;
    if !inheritance.inheritable {
        return false;
    }
    if inheritance.exclude.iter().any(|id| id == target_id) {
        return false;
    }
    if !inheritance.include.is_empty() && !inheritance.include.iter().any(|id| id == target_id) {
        return false;
    }
    true
}
