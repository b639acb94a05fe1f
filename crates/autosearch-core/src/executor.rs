//! Fallback executor
//!
//! Runs one trigger through the provider chain in order, stopping at the first
//! provider that returns a non-empty result. A provider that errors, panics or
//! comes back empty is a miss and the next provider is tried. Only a fault in
//! the executor itself (for example an empty chain) is reported as an error.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::providers::ProviderRef;
use crate::search::{NormalizedResult, SearchTrigger};

/// What happened when one provider was asked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum AttemptOutcome {
    Hit,
    Miss,
    Error(String),
}

/// A single provider call within an execution
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

/// Result of running the chain for one trigger
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// First non-empty result, if any provider produced one
    pub payload: Option<NormalizedResult>,
    /// Provider that produced `payload`
    pub provider: Option<String>,
    pub attempts: Vec<ProviderAttempt>,
    /// Measured from executor entry to return
    pub latency: Duration,
}

impl ExecutionOutcome {
    pub fn sources(&self) -> Vec<String> {
        self.payload
            .as_ref()
            .map(|p| p.sources.clone())
            .unwrap_or_default()
    }
}

/// Ordered provider chain
#[derive(Clone, Default)]
pub struct FallbackExecutor {
    providers: Vec<ProviderRef>,
}

impl std::fmt::Debug for FallbackExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackExecutor")
            .field("providers", &self.provider_names())
            .finish()
    }
}

impl FallbackExecutor {
    pub fn new(providers: Vec<ProviderRef>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Run the chain for a trigger
    pub async fn execute(&self, trigger: &SearchTrigger) -> Result<ExecutionOutcome> {
        if self.providers.is_empty() {
            return Err(Error::NoProviders);
        }

        let started = Instant::now();
        let mut attempts = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let name = provider.name().to_string();
            let attempt_started = Instant::now();

            let outcome = AssertUnwindSafe(provider.search(&trigger.query))
                .catch_unwind()
                .await;
            let elapsed = attempt_started.elapsed();

            match outcome {
                Ok(Ok(Some(result))) if !result.is_empty() => {
                    attempts.push(ProviderAttempt {
                        provider: name.clone(),
                        elapsed,
                        outcome: AttemptOutcome::Hit,
                    });
                    info!(
                        query = %trigger.query,
                        provider = %name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Provider returned a result"
                    );
                    return Ok(ExecutionOutcome {
                        payload: Some(result),
                        provider: Some(name),
                        attempts,
                        latency: started.elapsed(),
                    });
                }
                Ok(Ok(_)) => {
                    debug!(query = %trigger.query, provider = %name, "Provider miss");
                    attempts.push(ProviderAttempt {
                        provider: name,
                        elapsed,
                        outcome: AttemptOutcome::Miss,
                    });
                }
                Ok(Err(e)) => {
                    if e.is_provider_error() {
                        warn!(query = %trigger.query, provider = %name, error = %e, "Provider failed, falling back");
                    } else {
                        warn!(
                            query = %trigger.query,
                            provider = %name,
                            code = e.code(),
                            error = %e,
                            "Provider raised an unexpected error, falling back"
                        );
                    }
                    attempts.push(ProviderAttempt {
                        provider: name,
                        elapsed,
                        outcome: AttemptOutcome::Error(e.to_string()),
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(query = %trigger.query, provider = %name, panic = %message, "Provider panicked, falling back");
                    attempts.push(ProviderAttempt {
                        provider: name,
                        elapsed,
                        outcome: AttemptOutcome::Error(format!("panic: {}", message)),
                    });
                }
            }
        }

        info!(query = %trigger.query, attempts = attempts.len(), "All providers missed");

        Ok(ExecutionOutcome {
            payload: None,
            provider: None,
            attempts,
            latency: started.elapsed(),
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::SearchProvider;
    use crate::search::SearchRequest;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Empty,
        Hit(&'static str),
        Fail,
        Panic,
        Slow(Duration),
    }

    struct ScriptedProvider {
        name: &'static str,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(&self, _query: &str) -> Result<Option<NormalizedResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Empty => Ok(None),
                Behaviour::Hit(source) => Ok(Some(NormalizedResult {
                    sources: vec![source.to_string()],
                    ..Default::default()
                })),
                Behaviour::Fail => Err(Error::Provider {
                    provider: self.name.to_string(),
                    message: "boom".into(),
                }),
                Behaviour::Panic => panic!("provider exploded"),
                Behaviour::Slow(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(None)
                }
            }
        }
    }

    fn trigger() -> SearchTrigger {
        SearchTrigger::admit(SearchRequest::new("Tokyo", "user_input"))
    }

    #[tokio::test]
    async fn test_primary_hit_skips_rest() {
        let primary = ScriptedProvider::new("primary", Behaviour::Hit("primary-src"));
        let deep = ScriptedProvider::new("deep", Behaviour::Hit("deep-src"));
        let executor = FallbackExecutor::new(vec![primary.clone(), deep.clone()]);

        let outcome = executor.execute(&trigger()).await.unwrap();
        assert_eq!(outcome.provider.as_deref(), Some("primary"));
        assert_eq!(outcome.sources(), vec!["primary-src".to_string()]);
        assert_eq!(deep.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_deep_and_never_calls_multi() {
        let primary = ScriptedProvider::new("primary", Behaviour::Empty);
        let deep = ScriptedProvider::new("deep", Behaviour::Hit("deep-src"));
        let multi = ScriptedProvider::new("multi", Behaviour::Hit("multi-src"));
        let executor = FallbackExecutor::new(vec![primary.clone(), deep.clone(), multi.clone()]);

        let outcome = executor.execute(&trigger()).await.unwrap();
        assert_eq!(outcome.provider.as_deref(), Some("deep"));
        assert_eq!(outcome.sources(), vec!["deep-src".to_string()]);
        assert_eq!(primary.calls(), 1);
        assert_eq!(deep.calls(), 1);
        assert_eq!(multi.calls(), 0);
        assert_eq!(
            outcome.attempts.iter().map(|a| a.outcome.clone()).collect::<Vec<_>>(),
            vec![AttemptOutcome::Miss, AttemptOutcome::Hit]
        );
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_misses() {
        let primary = ScriptedProvider::new("primary", Behaviour::Fail);
        let deep = ScriptedProvider::new("deep", Behaviour::Panic);
        let multi = ScriptedProvider::new("multi", Behaviour::Hit("multi-src"));
        let executor = FallbackExecutor::new(vec![primary, deep, multi]);

        let outcome = executor.execute(&trigger()).await.unwrap();
        assert_eq!(outcome.provider.as_deref(), Some("multi"));
        assert!(matches!(outcome.attempts[0].outcome, AttemptOutcome::Error(_)));
        match &outcome.attempts[1].outcome {
            AttemptOutcome::Error(msg) => assert!(msg.contains("provider exploded")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_miss_returns_empty_outcome() {
        let executor = FallbackExecutor::new(vec![
            ScriptedProvider::new("primary", Behaviour::Empty),
            ScriptedProvider::new("deep", Behaviour::Fail),
            ScriptedProvider::new("multi", Behaviour::Empty),
        ]);

        let outcome = executor.execute(&trigger()).await.unwrap();
        assert!(outcome.payload.is_none());
        assert!(outcome.provider.is_none());
        assert!(outcome.sources().is_empty());
        assert_eq!(outcome.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_chain_is_a_fault() {
        let executor = FallbackExecutor::new(Vec::new());
        let err = executor.execute(&trigger()).await.unwrap_err();
        assert!(matches!(err, Error::NoProviders));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_spans_whole_chain() {
        let executor = FallbackExecutor::new(vec![
            ScriptedProvider::new("primary", Behaviour::Slow(Duration::from_millis(300))),
            ScriptedProvider::new("deep", Behaviour::Slow(Duration::from_millis(200))),
            ScriptedProvider::new("multi", Behaviour::Hit("multi-src")),
        ]);

        let outcome = executor.execute(&trigger()).await.unwrap();
        assert!(outcome.latency >= Duration::from_millis(500));
        assert!(outcome.attempts[0].elapsed >= Duration::from_millis(300));
        assert!(outcome.attempts[1].elapsed >= Duration::from_millis(200));
    }
}
