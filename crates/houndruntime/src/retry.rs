use chrono::{DateTime, Utc};
use houndcore::{ErrorKind, ExecutionContext, ExecutionId, FailureRecord, Step, StepError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Message fragments that mark an unclassified error as retryable.
/// Acknowledged heuristic, not a precise classifier.
const RETRYABLE_KEYWORDS: &[&str] = &[
    "timeout",
    "network",
    "connection",
    "not found",
    "not visible",
    "not interactable",
    "stale",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// What the orchestrator should do with a failed attempt.
#[derive(Debug, Clone)]
pub struct RetryDecision {
    pub retryable: bool,
    /// Retries already consumed for this step before this failure.
    pub attempt: u32,
    pub should_retry: bool,
    pub delay: Duration,
}

/// Audit record kept for every handled failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryLogEntry {
    pub execution_id: ExecutionId,
    pub step_id: String,
    pub kind: ErrorKind,
    pub message: String,
    pub attempt: u32,
    pub retried: bool,
    pub timestamp: DateTime<Utc>,
}

/// Classifies failures, computes backoff and tracks attempt counters
/// per `(execution, step)`.
pub struct ErrorHandler {
    config: RetryConfig,
    attempts: HashMap<(ExecutionId, String), u32>,
    log: Vec<RetryLogEntry>,
}

impl ErrorHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: HashMap::new(),
            log: Vec::new(),
        }
    }

    /// Classified kinds decide outright; anything else falls back to
    /// a case-insensitive keyword scan of the message.
    pub fn is_retryable(&self, error: &StepError, step: &Step) -> bool {
        if !self.config.enabled || step.retries == Some(0) {
            return false;
        }
        match error.kind().retryable() {
            Some(decision) => decision,
            None => {
                let message = error.to_string().to_lowercase();
                RETRYABLE_KEYWORDS.iter().any(|kw| message.contains(kw))
            }
        }
    }

    pub fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay_ms;
        let raw = match self.config.strategy {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(attempt.min(32)))
            }
            BackoffStrategy::Linear => base.saturating_mul(attempt as u64 + 1),
            BackoffStrategy::Fixed => base,
        };
        Duration::from_millis(raw.min(self.config.max_delay_ms))
    }

    pub fn max_retries_for(&self, step: &Step) -> u32 {
        step.retries.unwrap_or(self.config.max_retries)
    }

    pub fn attempts_for(&self, execution_id: ExecutionId, step_id: &str) -> u32 {
        self.attempts
            .get(&(execution_id, step_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Record a failed attempt and decide retry vs. abort. On the
    /// final failure the record lands in the context's error list;
    /// every attempt lands in the handler's own audit log.
    pub fn handle_error(
        &mut self,
        error: &StepError,
        context: &mut ExecutionContext,
        step: &Step,
    ) -> RetryDecision {
        let key = (context.execution_id, step.id.clone());
        let attempt = self.attempts.get(&key).copied().unwrap_or(0);
        let retryable = self.is_retryable(error, step);
        let should_retry = retryable && attempt < self.max_retries_for(step);
        let delay = if should_retry {
            self.calculate_retry_delay(attempt)
        } else {
            Duration::ZERO
        };

        self.log.push(RetryLogEntry {
            execution_id: context.execution_id,
            step_id: step.id.clone(),
            kind: error.kind(),
            message: error.to_string(),
            attempt,
            retried: should_retry,
            timestamp: Utc::now(),
        });

        if should_retry {
            self.attempts.insert(key, attempt + 1);
            tracing::warn!(
                execution_id = %context.execution_id,
                step_id = %step.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "step failed, retrying"
            );
        } else {
            context.record_failure(FailureRecord {
                message: error.to_string(),
                kind: error.kind(),
                step_id: step.id.clone(),
                step_type: step.step_type,
                attempt_count: attempt + 1,
                retryable,
                timestamp: Utc::now(),
            });
            tracing::error!(
                execution_id = %context.execution_id,
                step_id = %step.id,
                attempts = attempt + 1,
                error = %error,
                "step failed permanently"
            );
        }

        RetryDecision {
            retryable,
            attempt,
            should_retry,
            delay,
        }
    }

    /// Counters reset on step success.
    pub fn reset_attempts(&mut self, execution_id: ExecutionId, step_id: &str) {
        self.attempts.remove(&(execution_id, step_id.to_string()));
    }

    pub fn retry_log(&self) -> &[RetryLogEntry] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use houndcore::{EventEmitter, StepType};
    use uuid::Uuid;

    fn step(id: &str) -> Step {
        Step::new(id, StepType::Click)
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("wf", 1, EventEmitter::detached(Uuid::new_v4()))
    }

    #[test]
    fn classified_kinds_override_message() {
        let handler = ErrorHandler::new(RetryConfig::default());
        let s = step("s");
        // Non-retryable kind even though the message says "timeout".
        let err = StepError::Validation("request timeout exceeded".to_string());
        assert!(!handler.is_retryable(&err, &s));
        assert!(handler.is_retryable(&StepError::Timeout { ms: 10 }, &s));
        assert!(handler.is_retryable(&StepError::StaleElement("gone".to_string()), &s));
        assert!(!handler.is_retryable(&StepError::QuotaExceeded("q".to_string()), &s));
    }

    #[test]
    fn keyword_heuristic_for_unclassified() {
        let handler = ErrorHandler::new(RetryConfig::default());
        let s = step("s");
        assert!(handler.is_retryable(&StepError::Action("Connection reset by peer".into()), &s));
        assert!(handler.is_retryable(&StepError::Action("element NOT FOUND".into()), &s));
        assert!(!handler.is_retryable(&StepError::Action("malformed selector".into()), &s));
    }

    #[test]
    fn step_zero_retries_disables() {
        let handler = ErrorHandler::new(RetryConfig::default());
        let s = step("s").with_retries(0);
        assert!(!handler.is_retryable(&StepError::Timeout { ms: 10 }, &s));
    }

    #[test]
    fn globally_disabled() {
        let handler = ErrorHandler::new(RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        });
        assert!(!handler.is_retryable(&StepError::Timeout { ms: 10 }, &step("s")));
    }

    #[test]
    fn exponential_delays_capped() {
        let handler = ErrorHandler::new(RetryConfig::default());
        assert_eq!(handler.calculate_retry_delay(0), Duration::from_millis(1000));
        assert_eq!(handler.calculate_retry_delay(1), Duration::from_millis(2000));
        assert_eq!(handler.calculate_retry_delay(2), Duration::from_millis(4000));
        assert_eq!(handler.calculate_retry_delay(10), Duration::from_millis(30_000));
    }

    #[test]
    fn linear_and_fixed_delays() {
        let linear = ErrorHandler::new(RetryConfig {
            strategy: BackoffStrategy::Linear,
            ..RetryConfig::default()
        });
        assert_eq!(linear.calculate_retry_delay(0), Duration::from_millis(1000));
        assert_eq!(linear.calculate_retry_delay(2), Duration::from_millis(3000));

        let fixed = ErrorHandler::new(RetryConfig {
            strategy: BackoffStrategy::Fixed,
            ..RetryConfig::default()
        });
        assert_eq!(fixed.calculate_retry_delay(5), Duration::from_millis(1000));
    }

    #[test]
    fn budget_exhaustion_records_failure() {
        let mut handler = ErrorHandler::new(RetryConfig::default());
        let mut ctx = context();
        let s = step("s");
        let err = StepError::Timeout { ms: 10 };

        for expected_attempt in 0..3 {
            let decision = handler.handle_error(&err, &mut ctx, &s);
            assert!(decision.should_retry);
            assert_eq!(decision.attempt, expected_attempt);
        }
        let last = handler.handle_error(&err, &mut ctx, &s);
        assert!(!last.should_retry);
        assert!(last.retryable);
        assert_eq!(last.attempt, 3);

        assert_eq!(ctx.errors().len(), 1);
        assert_eq!(ctx.errors()[0].attempt_count, 4);
        assert_eq!(handler.retry_log().len(), 4);
    }

    #[test]
    fn counters_scoped_per_execution() {
        let mut handler = ErrorHandler::new(RetryConfig::default());
        let mut ctx_a = context();
        let mut ctx_b = context();
        let s = step("s");
        let err = StepError::Network("down".to_string());

        handler.handle_error(&err, &mut ctx_a, &s);
        handler.handle_error(&err, &mut ctx_a, &s);
        assert_eq!(handler.attempts_for(ctx_a.execution_id, "s"), 2);
        // Same step id in a different execution starts fresh.
        let decision = handler.handle_error(&err, &mut ctx_b, &s);
        assert_eq!(decision.attempt, 0);

        handler.reset_attempts(ctx_a.execution_id, "s");
        assert_eq!(handler.attempts_for(ctx_a.execution_id, "s"), 0);
    }
}
