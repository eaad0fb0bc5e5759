//! Plan requester: goal -> validated [`Plan`] via a structured-generation call

use super::model::Plan;
use super::schema::{build_prompt, parse_plan, plan_schema, SYSTEM_PROMPT};
use crate::provider::{build_provider, ErrorCategory, LlmProvider, LlmRequest, ProviderError};
use crate::{PlanlabConfig, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from plan generation
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Goal must not be empty")]
    EmptyGoal,

    #[error("Plan generation failed after {attempts} attempt(s): {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: ProviderError,
    },
}

impl GenerationError {
    /// Category of the last provider error; `None` for a rejected goal
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            GenerationError::EmptyGoal => None,
            GenerationError::Failed { source, .. } => Some(source.category()),
        }
    }

    /// Number of provider calls made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            GenerationError::EmptyGoal => 0,
            GenerationError::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Exponential backoff between sequential attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
    }
}

/// Turns a goal into a validated plan
pub struct PlanRequester {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    temperature: Option<f32>,
}

impl PlanRequester {
    /// Create a requester over an existing provider
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            temperature: None,
        }
    }

    /// Build the provider and retry policy from configuration
    ///
    /// Fails with [`ProviderError::Config`] when the credential is missing.
    pub fn from_config(config: &PlanlabConfig) -> Result<Self, ProviderError> {
        let provider = build_provider(&config.provider)?;
        Ok(Self::new(provider, RetryPolicy::from(&config.retry)))
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn build_request(&self, goal: &str) -> LlmRequest {
        let request =
            LlmRequest::new(SYSTEM_PROMPT, build_prompt(goal)).with_response_schema(plan_schema());
        match self.temperature {
            Some(temp) => request.with_temperature(temp),
            None => request,
        }
    }

    /// Generate a plan for `goal`
    ///
    /// Attempts are sequential. Every failure except a configuration error is
    /// retried up to the policy's cap; the last error is returned once the
    /// retries are exhausted.
    pub async fn generate_plan(&self, goal: &str) -> Result<Plan, GenerationError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(GenerationError::EmptyGoal);
        }

        let request = self.build_request(goal);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(
                provider = self.provider.name(),
                model = self.provider.model(),
                attempt,
                "Requesting plan"
            );

            let result = self
                .provider
                .complete(&request)
                .await
                .and_then(|response| parse_plan(&response.content));

            let err = match result {
                Ok(plan) => {
                    if plan.experiment(&plan.recommended_winner_id).is_none() {
                        debug!(
                            winner = %plan.recommended_winner_id,
                            "Recommended winner not among experiments, falling back to first"
                        );
                    }
                    info!(
                        attempt,
                        experiments = plan.experiments.len(),
                        title = %plan.title,
                        "Plan generated"
                    );
                    return Ok(plan);
                }
                Err(err) => err,
            };

            let retries_used = attempt - 1;
            if !err.is_retryable() || retries_used >= self.retry.max_retries {
                warn!(
                    attempt,
                    category = %err.category(),
                    error = %err,
                    "Plan generation failed"
                );
                return Err(GenerationError::Failed {
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.retry.delay_for(retries_used);
            warn!(
                attempt,
                category = %err.category(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Plan generation attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
