//! Collaborator contracts: rule persistence and external reference loading
//!
//! The engine never persists rules itself; deployments plug their stores in
//! through these traits.

use crate::context::AnalysisContext;
use crate::rules::Rule;
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait RuleCatalog: Send + Sync {
    async fn list_rules(&self, organization_id: &str) -> anyhow::Result<Vec<Rule>>;
    async fn find_rule_by_id(&self, uuid: Uuid) -> anyhow::Result<Option<Rule>>;
}

/// Loads the external references a rule declares.
///
/// Rules whose declared references fail to load must be excluded from the
/// candidate set for that run, never silently treated as reference-free.
#[async_trait]
pub trait ReferenceLoader: Send + Sync {
    async fn load_references(
        &self,
        rules: &[Rule],
        context: &AnalysisContext,
    ) -> anyhow::Result<HashMap<Uuid, Vec<String>>>;
}

/// In-memory catalog for tests and local runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    rules: Vec<Rule>,
}

impl InMemoryCatalog {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl RuleCatalog for InMemoryCatalog {
    async fn list_rules(&self, _organization_id: &str) -> anyhow::Result<Vec<Rule>> {
        Ok(self.rules.clone())
    }

    async fn find_rule_by_id(&self, uuid: Uuid) -> anyhow::Result<Option<Rule>> {
        Ok(self.rules.iter().find(|rule| rule.uuid == uuid).cloned())
    }
}
