use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use conductor_core::config::RetryConfig;
use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::AiInvoker;
use conductor_core::types::{InvokeResult, WorkOrder};

/// An invoker that retries failed calls and falls back to alternative invokers.
///
/// Shared between orchestrators by `Arc`; holds no per-session state.
pub struct InvokerPool {
    primary: Arc<dyn AiInvoker>,
    fallbacks: Vec<Arc<dyn AiInvoker>>,
    retry_config: RetryConfig,
}

impl InvokerPool {
    pub fn new(primary: Arc<dyn AiInvoker>, retry_config: RetryConfig) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            retry_config,
        }
    }

    /// Add an invoker tried once after the primary is exhausted.
    pub fn with_fallback(mut self, fallback: Arc<dyn AiInvoker>) -> Self {
        self.fallbacks.push(fallback);
        self
    }
}

fn is_retryable(e: &ConductorError) -> bool {
    matches!(
        e,
        ConductorError::Invoker(_) | ConductorError::InvokerTimeout { .. } | ConductorError::Io(_)
    )
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// Fold a reported failure into an error so both paths retry alike.
fn into_result(result: Result<InvokeResult>) -> Result<InvokeResult> {
    match result {
        Ok(r) if r.success => Ok(r),
        Ok(r) => Err(ConductorError::Invoker(
            r.error.unwrap_or_else(|| "invoker reported failure".into()),
        )),
        Err(e) => Err(e),
    }
}

impl AiInvoker for InvokerPool {
    fn invoke(&self, order: WorkOrder) -> BoxFuture<'_, Result<InvokeResult>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match into_result(self.primary.invoke(order.clone()).await) {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                invoker = self.primary.name(),
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying AI invocation"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!(invoker = self.primary.name(), "Primary invoker exhausted, trying fallbacks");
            }
            for fallback in &self.fallbacks {
                match into_result(fallback.invoke(order.clone()).await) {
                    Ok(result) => {
                        info!(invoker = fallback.name(), "Fell back to alternative invoker");
                        return Ok(result);
                    }
                    Err(e) => {
                        warn!(invoker = fallback.name(), error = %e, "Fallback invoker also failed");
                        last_err = Some(e);
                    }
                }
            }

            Ok(InvokeResult::failure(
                last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "all invokers failed".into()),
            ))
        })
    }

    fn name(&self) -> &str {
        "pool"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_test_utils::ScriptedInvoker;

    fn order() -> WorkOrder {
        WorkOrder {
            model: "m".into(),
            prompt: "p".into(),
            temperature: None,
            max_tokens: None,
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(6000));
        assert!(d >= Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn retries_primary_then_succeeds() {
        let primary = Arc::new(ScriptedInvoker::from_results(vec![
            Err(ConductorError::Invoker("503".into())),
            Ok(InvokeResult::success("PROCEED")),
        ]));
        let pool = InvokerPool::new(primary.clone(), fast_retry(2));
        let result = pool.invoke(order()).await.unwrap();
        assert_eq!(result.content.as_deref(), Some("PROCEED"));
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn falls_back_after_retries_exhausted() {
        let primary = Arc::new(ScriptedInvoker::from_results(vec![
            Ok(InvokeResult::failure("boom")),
            Ok(InvokeResult::failure("boom")),
        ]));
        let fallback = Arc::new(ScriptedInvoker::new(&["REDO: from fallback"]));
        let pool = InvokerPool::new(primary.clone(), fast_retry(1)).with_fallback(fallback.clone());

        let result = pool.invoke(order()).await.unwrap();
        assert_eq!(result.content.as_deref(), Some("REDO: from fallback"));
        assert_eq!(primary.calls(), 2);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn reports_failure_when_everything_fails() {
        let primary = Arc::new(ScriptedInvoker::from_results(vec![Err(
            ConductorError::Config("bad".into()),
        )]));
        let pool = InvokerPool::new(primary.clone(), fast_retry(3));
        let result = pool.invoke(order()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("bad"));
        // Non-retryable errors are not retried.
        assert_eq!(primary.calls(), 1);
    }
}
