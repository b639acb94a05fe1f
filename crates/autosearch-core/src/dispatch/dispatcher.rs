//! Search dispatcher
//!
//! Owns the backlog, the concurrency gate and the deduplicating history, and
//! drives each admitted trigger through the fallback chain:
//!
//! ```text
//! submit -> QUEUED -> (gate admits) -> IN_FLIGHT -> COMPLETED | FAILED
//! ```
//!
//! `submit` never waits for a provider. Dispatch happens on spawned tasks, and
//! each terminal transition frees its slot and schedules another dispatch
//! attempt after the completion cooldown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::gate::{ConcurrencyGate, GateDecision};
use super::queue::TriggerQueue;
use super::signal::EngineSignal;
use crate::audit::{AuditRecord, AuditSink};
use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::events::{EventPublisher, SearchEvent, SearchEventKind, Subscription};
use crate::executor::{ExecutionOutcome, FallbackExecutor};
use crate::history::{Admission, Deduplicator, HistoryBackend, HistoryEntry, HistoryStore};
use crate::providers::ProviderRef;
use crate::scoring::ConfidenceScorer;
use crate::search::{
    Priority, ReportParams, SearchRequest, SearchResult, SearchTrigger, TriggerSource,
    extract_location_queries,
};
use crate::stats::SearchStats;

/// Context attached to proactive report searches
pub const REPORT_CONTEXT: &str = "report_building";
/// Context attached to autonomous requests
pub const AUTONOMOUS_CONTEXT: &str = "autonomous";

/// What `submit` did with a request
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Admitted to the backlog
    Queued { trigger_id: Uuid },
    /// A fresh result was already in history
    Cached(SearchResult),
    /// The same query is already queued or in flight
    Coalesced { trigger_id: Uuid },
    /// Searching is switched off
    Disabled,
    /// Blank query
    InvalidQuery,
    /// The backlog is at `max_backlog`
    BacklogFull { capacity: usize },
    ShutDown,
}

impl SubmitOutcome {
    /// Trigger that will produce the result, if one is outstanding
    pub fn trigger_id(&self) -> Option<Uuid> {
        match self {
            Self::Queued { trigger_id } | Self::Coalesced { trigger_id } => Some(*trigger_id),
            _ => None,
        }
    }

    /// Whether a result is available now or will be published later
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Self::Queued { .. } | Self::Cached(_) | Self::Coalesced { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Cached(_) => "cached",
            Self::Coalesced { .. } => "coalesced",
            Self::Disabled => "disabled",
            Self::InvalidQuery => "invalid_query",
            Self::BacklogFull { .. } => "backlog_full",
            Self::ShutDown => "shut_down",
        }
    }
}

/// Where a known trigger currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Queued,
    InFlight,
}

/// Builder for [`SearchDispatcher`]
pub struct DispatcherBuilder {
    config: SearchConfig,
    providers: Vec<ProviderRef>,
    backend: Option<Arc<dyn HistoryBackend>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl DispatcherBuilder {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            backend: None,
            audit: None,
        }
    }

    /// Append one provider to the end of the chain
    pub fn provider(mut self, provider: ProviderRef) -> Self {
        self.providers.push(provider);
        self
    }

    /// Replace the chain
    pub fn providers(mut self, providers: Vec<ProviderRef>) -> Self {
        self.providers = providers;
        self
    }

    pub fn history_backend(mut self, backend: Arc<dyn HistoryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Validate the config, load persisted history and start the event task.
    ///
    /// Must be called from within a Tokio runtime. A history backend that
    /// cannot be read is logged and the dispatcher starts with empty history.
    pub async fn build(self) -> Result<SearchDispatcher> {
        self.config
            .validate()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let history = match &self.backend {
            Some(backend) => match backend.load().await {
                Ok(Some(entries)) => {
                    info!(
                        backend = %backend.describe(),
                        entries = entries.len(),
                        "Loaded search history"
                    );
                    HistoryStore::from_entries(entries)
                }
                Ok(None) => HistoryStore::new(),
                Err(e) => {
                    warn!(
                        backend = %backend.describe(),
                        error = %e,
                        "Failed to load search history, starting empty"
                    );
                    HistoryStore::new()
                }
            },
            None => HistoryStore::new(),
        };

        let executor = FallbackExecutor::new(self.providers);
        debug!(providers = ?executor.provider_names(), "Search dispatcher ready");

        Ok(SearchDispatcher {
            inner: Arc::new(Inner {
                config: RwLock::new(self.config),
                state: Mutex::new(DispatchState {
                    dedup: Deduplicator::new(history),
                    queue: TriggerQueue::new(),
                    gate: ConcurrencyGate::new(),
                    retry_scheduled: false,
                    shut_down: false,
                }),
                executor,
                scorer: ConfidenceScorer::new(),
                events: EventPublisher::new(),
                backend: self.backend,
                audit: self.audit,
                save_lock: tokio::sync::Mutex::new(()),
                proactive_running: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        })
    }
}

struct DispatchState {
    dedup: Deduplicator,
    queue: TriggerQueue,
    gate: ConcurrencyGate,
    /// A rate-limit retry is already sleeping
    retry_scheduled: bool,
    shut_down: bool,
}

impl DispatchState {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.gate.in_flight() == 0
    }
}

struct Inner {
    config: RwLock<SearchConfig>,
    state: Mutex<DispatchState>,
    executor: FallbackExecutor,
    scorer: ConfidenceScorer,
    events: EventPublisher,
    backend: Option<Arc<dyn HistoryBackend>>,
    audit: Option<Arc<dyn AuditSink>>,
    /// Serializes history snapshots so an older one never lands last
    save_lock: tokio::sync::Mutex<()>,
    proactive_running: AtomicBool,
    idle: Notify,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn config(&self) -> SearchConfig {
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Clears the proactive flag even if the pass unwinds
struct ProactiveGuard<'a>(&'a AtomicBool);

impl Drop for ProactiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to the search engine; clones share one queue, gate and history
#[derive(Clone)]
pub struct SearchDispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SearchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("SearchDispatcher")
            .field("queued", &state.queue.len())
            .field("in_flight", &state.gate.in_flight())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

impl SearchDispatcher {
    pub fn builder(config: SearchConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Admit a request, answer it from history, or refuse it
    pub fn submit(&self, request: SearchRequest) -> SubmitOutcome {
        let config = self.inner.config();
        if !config.enabled {
            debug!(query = %request.query, "Search disabled, request ignored");
            return SubmitOutcome::Disabled;
        }
        if request.query.trim().is_empty() {
            let err = Error::InvalidQuery("query is blank".to_string());
            debug!(code = err.code(), error = %err, context = %request.context, "Request refused");
            return SubmitOutcome::InvalidQuery;
        }

        let outcome = {
            let mut state = self.inner.state();
            if state.shut_down {
                return SubmitOutcome::ShutDown;
            }

            let admission = state.dedup.check(&request.query, config.cache_ttl());
            match admission {
                Admission::Cached(result) => {
                    drop(state);
                    debug!(query = %request.query, "Cache hit");
                    self.inner.events.publish(SearchEvent::SearchResultReady {
                        query: result.query.clone(),
                        result: result.clone(),
                        trigger: None,
                        cached: true,
                    });
                    return SubmitOutcome::Cached(result);
                }
                Admission::Pending(trigger_id) => {
                    debug!(query = %request.query, %trigger_id, "Query already pending, coalesced");
                    return SubmitOutcome::Coalesced { trigger_id };
                }
                Admission::Fresh => {}
            }

            if let Some(capacity) = config.max_backlog {
                if state.queue.len() >= capacity {
                    let err = Error::BacklogFull(capacity);
                    warn!(
                        query = %request.query,
                        code = err.code(),
                        error = %err,
                        suggestion = err.suggestion().as_deref().unwrap_or(""),
                        "Request refused"
                    );
                    return SubmitOutcome::BacklogFull { capacity };
                }
            }

            let trigger = SearchTrigger::admit(request);
            let trigger_id = trigger.id;
            debug!(
                %trigger_id,
                query = %trigger.query,
                priority = %trigger.priority,
                source = %trigger.source,
                "Search queued"
            );
            state.dedup.mark_pending(&trigger.query, trigger_id);
            state.queue.push(trigger);
            SubmitOutcome::Queued { trigger_id }
        };

        self.try_dispatch();
        outcome
    }

    /// Submit a query with an explicit context and priority
    pub fn trigger_search(
        &self,
        query: impl Into<String>,
        context: impl Into<String>,
        priority: Priority,
    ) -> SubmitOutcome {
        self.submit(SearchRequest::new(query, context).with_priority(priority))
    }

    /// Search every location mentioned in report parameters.
    ///
    /// Returns nothing when proactive search is off or a pass is already
    /// running.
    pub fn proactive_search_for_report(&self, params: &ReportParams) -> Vec<SubmitOutcome> {
        if !self.inner.config().proactive_search_enabled {
            return Vec::new();
        }
        if self.inner.proactive_running.swap(true, Ordering::SeqCst) {
            debug!("Proactive search already running, skipped");
            return Vec::new();
        }
        let _guard = ProactiveGuard(&self.inner.proactive_running);

        let queries = extract_location_queries(params);
        info!(queries = queries.len(), "Proactive search for report");
        queries
            .into_iter()
            .map(|query| {
                self.submit(
                    SearchRequest::new(query, REPORT_CONTEXT)
                        .with_priority(Priority::High)
                        .with_source(TriggerSource::ReportBuilding),
                )
            })
            .collect()
    }

    /// React to a host application signal
    pub fn handle_signal(&self, signal: EngineSignal) -> Vec<SubmitOutcome> {
        match signal {
            EngineSignal::ParamsUpdated { params } => {
                if self.inner.config().trigger_on_input {
                    self.proactive_search_for_report(&params)
                } else {
                    Vec::new()
                }
            }
            EngineSignal::ReportGenerationStarted { params } => {
                self.proactive_search_for_report(&params)
            }
            EngineSignal::AutonomousSearchRequest { query, priority } => {
                vec![self.submit(
                    SearchRequest::new(query, AUTONOMOUS_CONTEXT)
                        .with_priority(priority)
                        .with_source(TriggerSource::Autonomous),
                )]
            }
        }
    }

    /// Dispatch as many queued triggers as the gate allows right now
    pub fn try_dispatch(&self) {
        let config = self.inner.config();
        let mut ready = Vec::new();
        {
            let mut state = self.inner.state();
            if state.shut_down {
                return;
            }
            while !state.queue.is_empty() {
                let now = Instant::now();
                match state.gate.check(
                    now,
                    config.max_concurrent_searches,
                    config.min_dispatch_interval(),
                ) {
                    GateDecision::AtCapacity => break,
                    GateDecision::Wait(delay) => {
                        if !state.retry_scheduled {
                            state.retry_scheduled = true;
                            debug!(delay_ms = delay.as_millis() as u64, "Dispatch rate limited, retry scheduled");
                            self.schedule_retry(delay);
                        }
                        break;
                    }
                    GateDecision::Admit => {
                        let Some(trigger) = state.queue.pop() else {
                            break;
                        };
                        state.gate.dispatch(trigger.id, now);
                        ready.push(trigger);
                    }
                }
            }
        }

        for trigger in ready {
            let dispatcher = self.clone();
            tokio::spawn(async move { dispatcher.run(trigger).await });
        }
    }

    fn schedule_retry(&self, delay: std::time::Duration) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher.inner.state().retry_scheduled = false;
            dispatcher.try_dispatch();
        });
    }

    async fn run(self, trigger: SearchTrigger) {
        let config = self.inner.config();
        info!(
            trigger_id = %trigger.id,
            query = %trigger.query,
            context = %trigger.context,
            priority = %trigger.priority,
            "Search started"
        );
        self.inner.events.publish(SearchEvent::SearchStarted {
            trigger: trigger.clone(),
        });

        let executor = self.inner.executor.clone();
        let job = trigger.clone();
        let mut handle = tokio::spawn(async move { executor.execute(&job).await });

        let waited = tokio::time::timeout(config.trigger_timeout(), &mut handle).await;
        let outcome = match waited {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_error)) => Err(Error::ExecutorFault(join_error.to_string())),
            Err(_) => {
                handle.abort();
                Err(Error::Timeout(config.trigger_timeout_ms))
            }
        };

        match outcome {
            Ok(outcome) => self.complete(&trigger, outcome).await,
            Err(e) => self.fail(&trigger, e).await,
        }

        let idle = {
            let mut state = self.inner.state();
            state.gate.release(trigger.id);
            state.is_idle()
        };
        if idle {
            self.inner.idle.notify_waiters();
        }

        let cooldown = self.inner.config().completion_cooldown();
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            dispatcher.try_dispatch();
        });
    }

    async fn complete(&self, trigger: &SearchTrigger, outcome: ExecutionOutcome) {
        let sources = outcome.sources();
        let confidence = self
            .inner
            .scorer
            .score(outcome.payload.as_ref(), outcome.latency);
        let result = SearchResult {
            query: trigger.query.clone(),
            payload: outcome.payload,
            confidence,
            latency_ms: outcome.latency.as_millis() as u64,
            sources,
            provider: outcome.provider,
            completed_at: Utc::now(),
        };

        self.inner.state().dedup.complete(trigger.id, result.clone());

        info!(
            trigger_id = %trigger.id,
            query = %trigger.query,
            provider = result.provider.as_deref().unwrap_or("none"),
            confidence,
            latency_ms = result.latency_ms,
            "Search completed"
        );

        self.inner.events.publish(SearchEvent::SearchCompleted {
            trigger: trigger.clone(),
            result: result.clone(),
        });
        if self.inner.config().feed_to_reports {
            self.inner.events.publish(SearchEvent::SearchResultReady {
                query: trigger.query.clone(),
                result: result.clone(),
                trigger: Some(trigger.clone()),
                cached: false,
            });
        }

        self.persist().await;
        self.audit(AuditRecord::completed(trigger, &result)).await;
    }

    async fn fail(&self, trigger: &SearchTrigger, e: Error) {
        error!(
            trigger_id = %trigger.id,
            query = %trigger.query,
            context = %trigger.context,
            code = e.code(),
            error = %e,
            "Search failed"
        );
        self.inner.state().dedup.release(&trigger.query, trigger.id);

        let message = e.to_string();
        self.inner.events.publish(SearchEvent::SearchFailed {
            trigger: trigger.clone(),
            error: message.clone(),
        });
        self.audit(AuditRecord::failed(trigger, message)).await;
    }

    /// Write the current history snapshot to the backend
    async fn persist(&self) {
        let Some(backend) = &self.inner.backend else {
            return;
        };
        let _serial = self.inner.save_lock.lock().await;
        let entries = {
            let state = self.inner.state();
            state.dedup.entries()
        };
        if let Err(e) = backend.save(&entries).await {
            warn!(backend = %backend.describe(), error = %e, "Failed to persist search history");
        }
    }

    async fn audit(&self, record: AuditRecord) {
        let Some(sink) = &self.inner.audit else {
            return;
        };
        if let Err(e) = sink.record(&record).await {
            warn!(trigger_id = %record.trigger_id, error = %e, "Failed to write audit record");
        }
    }

    /// Swap the live config; new limits apply on the next dispatch attempt
    pub fn update_config(&self, config: SearchConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        match self.inner.config.write() {
            Ok(mut current) => *current = config.clone(),
            Err(poisoned) => *poisoned.into_inner() = config.clone(),
        }
        info!(
            enabled = config.enabled,
            max_concurrent = config.max_concurrent_searches,
            "Search config updated"
        );
        self.inner
            .events
            .publish(SearchEvent::SearchConfigUpdated { config });
        self.try_dispatch();
        Ok(())
    }

    pub fn config(&self) -> SearchConfig {
        self.inner.config()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.inner
            .executor
            .provider_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn stats(&self) -> SearchStats {
        let state = self.inner.state();
        SearchStats::compute(
            &state.dedup.entries(),
            state.gate.in_flight(),
            state.queue.len(),
        )
    }

    /// Remembered results, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.state().dedup.entries()
    }

    /// Forget every remembered result, in memory and in the backend
    pub async fn clear_history(&self) {
        self.inner.state().dedup.clear_history();
        let Some(backend) = &self.inner.backend else {
            return;
        };
        let _serial = self.inner.save_lock.lock().await;
        if let Err(e) = backend.clear().await {
            warn!(backend = %backend.describe(), error = %e, "Failed to clear persisted history");
        }
    }

    /// Backlog in dispatch order
    pub fn queued(&self) -> Vec<SearchTrigger> {
        self.inner.state().queue.snapshot()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state().gate.in_flight()
    }

    pub fn status(&self, trigger_id: Uuid) -> Option<TriggerStatus> {
        let state = self.inner.state();
        if state.gate.is_in_flight(&trigger_id) {
            Some(TriggerStatus::InFlight)
        } else if state.queue.contains(&trigger_id) {
            Some(TriggerStatus::Queued)
        } else {
            None
        }
    }

    pub fn is_idle(&self) -> bool {
        self.inner.state().is_idle()
    }

    /// Wait until nothing is queued or in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop dispatching and drop the backlog; in-flight triggers still finish.
    ///
    /// Returns the number of queued triggers that were dropped.
    pub fn shutdown(&self) -> usize {
        let (dropped, idle) = {
            let mut state = self.inner.state();
            state.shut_down = true;
            let dropped = state.queue.drain();
            for trigger in &dropped {
                state.dedup.release(&trigger.query, trigger.id);
            }
            (dropped.len(), state.is_idle())
        };
        info!(dropped, "Search dispatcher shut down");
        if idle {
            self.inner.idle.notify_waiters();
        }
        dropped
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state().shut_down
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.inner.events
    }

    pub fn subscribe<F>(&self, kind: SearchEventKind, handler: F) -> Subscription
    where
        F: Fn(&SearchEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, handler)
    }

    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SearchEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe_all(handler)
    }

    /// Forward events (optionally of one kind) into a channel
    pub fn events(
        &self,
        kind: Option<SearchEventKind>,
    ) -> (Subscription, tokio::sync::mpsc::UnboundedReceiver<SearchEvent>) {
        self.inner.events.channel(kind)
    }
}
