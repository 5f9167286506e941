//! Primary/fallback model-call execution with usage tracking
//!
//! Every structured prompt request is executed against the primary provider
//! configuration; on any execution error the identical request is executed
//! against the fallback configuration exactly once. There is no retry loop
//! beyond that single hop.
//!
//! Usage records flow back in the call result and are appended to an
//! invocation-owned [`UsageTracker`] by the caller, so nothing is mutated
//! from a captured shared reference.

use crate::context::ByokOverride;
use crate::pipeline::parse;
use crate::provider::{ModelProvider, PromptRequest, ProviderConfig, ProviderResponse, truncate_str};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Which provider tier ultimately served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTier {
    Primary,
    Fallback,
}

impl CallTier {
    pub fn as_str(self) -> &'static str {
        match self {
            CallTier::Primary => "primary",
            CallTier::Fallback => "fallback",
        }
    }
}

/// Usage for one completed model call, tagged for later attribution.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub call_id: Uuid,
    /// Set on fallback calls: the failed primary call this replaced.
    pub parent_call_id: Option<Uuid>,
    pub model: String,
    pub tier: CallTier,
    pub tags: Vec<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Invocation-owned usage accumulator.
///
/// Each top-level analysis creates its own tracker, so concurrent analyses of
/// different files or pull requests never share one.
#[derive(Debug, Default)]
pub struct UsageTracker {
    records: Vec<UsageRecord>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: UsageRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: Vec<UsageRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[UsageRecord] {
        &self.records
    }

    pub fn total_tokens(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.total_tokens)).sum()
    }
}

/// Result of one executed call: the response content, which tier served it,
/// and the usage records to append to the invocation tracker.
#[derive(Debug)]
pub struct ExecutorResponse {
    pub content: String,
    pub model: String,
    pub tier: CallTier,
    pub usage: Vec<UsageRecord>,
}

/// Executes prompt requests against a primary provider configuration,
/// falling back once to the secondary on failure.
#[derive(Clone)]
pub struct ModelCallExecutor {
    provider: Arc<dyn ModelProvider>,
    primary: ProviderConfig,
    fallback: ProviderConfig,
}

impl ModelCallExecutor {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        primary: ProviderConfig,
        fallback: ProviderConfig,
    ) -> Self {
        Self {
            provider,
            primary,
            fallback,
        }
    }

    /// Apply a bring-your-own-key override to the primary tier.
    pub fn with_byok(mut self, byok: Option<&ByokOverride>) -> Self {
        if let Some(byok) = byok {
            self.primary.provider = byok.provider.clone();
            self.primary.model = byok.model.clone();
        }
        self
    }

    pub fn primary_config(&self) -> &ProviderConfig {
        &self.primary
    }

    /// Execute against the primary provider; on any error, execute the
    /// identical request against the fallback exactly once.
    pub async fn execute(&self, request: &PromptRequest) -> anyhow::Result<ExecutorResponse> {
        let call_id = Uuid::new_v4();
        match self.provider.complete(request, &self.primary).await {
            Ok(response) => Ok(build_response(
                request,
                response,
                CallTier::Primary,
                call_id,
                None,
                &self.primary,
            )),
            Err(primary_err) => {
                warn!(
                    provider = %self.primary.provider,
                    error = %primary_err,
                    "primary model call failed; trying fallback"
                );
                match self.provider.complete(request, &self.fallback).await {
                    Ok(response) => Ok(build_response(
                        request,
                        response,
                        CallTier::Fallback,
                        Uuid::new_v4(),
                        Some(call_id),
                        &self.fallback,
                    )),
                    Err(fallback_err) => Err(anyhow::anyhow!(
                        "both providers failed: primary {} ({primary_err}); fallback {} ({fallback_err})",
                        self.primary.provider,
                        self.fallback.provider,
                    )),
                }
            }
        }
    }

    /// Execute and parse the response against an expected JSON shape.
    ///
    /// Schema-invalid output is logged with a raw preview and surfaces as
    /// `None` so callers can continue with whatever else they have; provider
    /// failure still propagates as an error.
    pub async fn execute_structured<T: DeserializeOwned>(
        &self,
        request: &PromptRequest,
    ) -> anyhow::Result<(Option<T>, Vec<UsageRecord>)> {
        let response = self.execute(request).await?;
        match parse::parse_structured::<T>(&response.content) {
            Ok(parsed) => Ok((Some(parsed), response.usage)),
            Err(failure) => {
                warn!(
                    tags = ?request.tags,
                    error = %failure,
                    raw = truncate_str(&response.content, 300),
                    "model response failed structured parse"
                );
                Ok((None, response.usage))
            }
        }
    }
}

fn build_response(
    request: &PromptRequest,
    response: ProviderResponse,
    tier: CallTier,
    call_id: Uuid,
    parent_call_id: Option<Uuid>,
    config: &ProviderConfig,
) -> ExecutorResponse {
    let mut tags = vec![
        format!("model:{}", config.provider),
        format!("tier:{}", tier.as_str()),
    ];
    tags.extend(request.tags.iter().cloned());

    let usage = response.usage.unwrap_or_default();
    let record = UsageRecord {
        call_id,
        parent_call_id,
        model: response.model.clone(),
        tier,
        tags,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    };

    ExecutorResponse {
        content: response.content,
        model: response.model,
        tier,
        usage: vec![record],
    }
}
