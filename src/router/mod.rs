//! Multi-model router.
//!
//! Picks one of several enabled models per request using a [`RoutingStrategy`],
//! with per-attempt timeout, retry and failover driven by live [`ModelStat`]s.
//!
//! - `route_request`: up to `max_retries` attempts, units forwarded as they arrive
//! - `concurrent_request`: first K available models, each answer buffered whole,
//!   yielded per model in completion order
//!
//! Enabled entries are model ids, optionally qualified as `backend:model`.
//! The owning backend is resolved through the [`BackendManager`].

mod stats;
mod strategy;


pub use stats::{ModelStat, ModelStatSnapshot, UNAVAILABLE_FAILURE_THRESHOLD, UNAVAILABLE_SUCCESS_RATE};
pub use strategy::RoutingStrategy;

use crate::config::{RouterConfig, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, DEFAULT_TIMEOUT_SECS};
use crate::error::ProviderError;
use crate::manager::BackendManager;
use crate::stream::UnitStream;
use crate::types::{ChatMessage, ChatRequest, SamplingParams, StreamUnit};
use futures::{Stream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

const CHANNEL_CAPACITY: usize = 64;

/// `(model entry, unit)` pairs from [`MultiModelRouter::concurrent_request`].
pub type ConcurrentStream = Pin<Box<dyn Stream<Item = (String, StreamUnit)> + Send>>;

struct RouterState {
    enabled: Vec<String>,
    stats: HashMap<String, ModelStat>,
    strategy: RoutingStrategy,
    max_retries: u32,
    timeout: Duration,
    retry_delay: Duration,
    cursor: usize,
}

struct RouterInner {
    manager: Arc<BackendManager>,
    state: Mutex<RouterState>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MultiModelRouter {
    inner: Arc<RouterInner>,
}

/// Where an attempt's units go.
enum Sink<'a> {
    Forward(&'a mpsc::Sender<Result<StreamUnit, ProviderError>>),
    Collect(&'a mut Vec<StreamUnit>),
}

impl Sink<'_> {
    /// False once the consumer is gone.
    async fn push(&mut self, unit: StreamUnit) -> bool {
        match self {
            Sink::Forward(tx) => tx.send(Ok(unit)).await.is_ok(),
            Sink::Collect(units) => {
                units.push(unit);
                true
            }
        }
    }

    fn watcher(&self) -> Option<mpsc::Sender<Result<StreamUnit, ProviderError>>> {
        match self {
            Sink::Forward(tx) => Some((*tx).clone()),
            Sink::Collect(_) => None,
        }
    }
}

enum Attempt {
    Completed,
    /// Consumer went away; nothing recorded.
    Cancelled,
    /// Retried unless [`ProviderError::is_retryable`] says otherwise.
    /// Unresolvable entries fail without being recorded.
    Failed(ProviderError),
}

impl MultiModelRouter {
    pub fn new(manager: Arc<BackendManager>, enabled_models: Vec<String>) -> Self {
        let stats = build_stats(&manager, &enabled_models, HashMap::new());
        let state = RouterState {
            enabled: enabled_models,
            stats,
            strategy: RoutingStrategy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            cursor: 0,
        };
        Self {
            inner: Arc::new(RouterInner { manager, state: Mutex::new(state) }),
        }
    }

    /// Router configured from the `[router]` section.
    pub fn from_config(manager: Arc<BackendManager>, config: &RouterConfig) -> Self {
        Self::new(manager, config.enabled_models.clone())
            .with_strategy(config.strategy)
            .with_max_retries(config.max_retries)
            .with_timeout(config.timeout())
            .with_retry_delay(config.retry_delay())
    }

    pub fn with_strategy(self, strategy: RoutingStrategy) -> Self {
        self.state().strategy = strategy;
        self
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        self.state().max_retries = max_retries;
        self
    }

    /// Per-attempt timeout covering connection and the whole stream.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.state().timeout = timeout;
        self
    }

    /// Pause between failed attempts.
    pub fn with_retry_delay(self, delay: Duration) -> Self {
        self.state().retry_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Configuration and statistics
    // ========================================================================

    pub fn strategy(&self) -> RoutingStrategy {
        self.state().strategy
    }

    pub fn set_strategy(&self, strategy: RoutingStrategy) {
        self.state().strategy = strategy;
        info!(strategy = %strategy, "Routing strategy set");
    }

    pub fn enabled_models(&self) -> Vec<String> {
        self.state().enabled.clone()
    }

    /// Replace the enabled set. New models start with fresh stats; removed models lose theirs.
    pub fn update_enabled_models(&self, models: Vec<String>) {
        let mut state = self.state();
        let existing = std::mem::take(&mut state.stats);
        state.stats = build_stats(&self.inner.manager, &models, existing);
        state.enabled = models;
        info!(models = ?state.enabled, "Enabled models updated");
    }

    pub fn stats(&self) -> BTreeMap<String, ModelStatSnapshot> {
        self.state()
            .stats
            .iter()
            .map(|(id, stat)| (id.clone(), stat.snapshot()))
            .collect()
    }

    pub fn model_stat(&self, model: &str) -> Option<ModelStatSnapshot> {
        self.state().stats.get(model).map(ModelStat::snapshot)
    }

    /// Mark one model (or all) available again. Counters are kept.
    pub fn reset_availability(&self, model: Option<&str>) {
        let mut state = self.state();
        match model {
            Some(model) => {
                if let Some(stat) = state.stats.get_mut(model) {
                    stat.reset_availability();
                    info!(model = %model, "Model availability reset");
                }
            }
            None => {
                state.stats.values_mut().for_each(ModelStat::reset_availability);
                info!("All model availability reset");
            }
        }
    }

    /// Next model per strategy among available enabled models.
    pub fn select_model(&self) -> Option<String> {
        let mut state = self.state();
        let RouterState { enabled, stats, strategy, cursor, .. } = &mut *state;

        let candidates: Vec<&ModelStat> = enabled
            .iter()
            .filter_map(|model| stats.get(model))
            .filter(|stat| stat.available)
            .collect();
        strategy.select(&candidates, cursor).map(|stat| stat.model_id.clone())
    }

    fn available_models(&self) -> Vec<String> {
        let state = self.state();
        state
            .enabled
            .iter()
            .filter(|model| state.stats.get(*model).is_some_and(|stat| stat.available))
            .cloned()
            .collect()
    }

    /// `Some(latency)` records a success, `None` a failure.
    fn record(&self, model: &str, backend: &str, latency: Option<Duration>) {
        let mut state = self.state();
        let Some(stat) = state.stats.get_mut(model) else {
            return;
        };
        if stat.backend.is_empty() {
            stat.backend = backend.to_string();
        }
        let flagged = match latency {
            Some(latency) => stat.record_success(latency),
            None => stat.record_failure(),
        };
        if flagged {
            warn!(
                model = %model,
                success_rate = stat.success_rate(),
                "Model marked unavailable"
            );
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Route one request with retry and failover.
    ///
    /// Units of the successful attempt are forwarded as they arrive. A retry
    /// after partial output starts a fresh backend request, so earlier units
    /// may be repeated. Exhausted retries end the stream with the last error;
    /// never having a candidate ends it with `NoAvailableModel`.
    pub fn route_request(&self, messages: Vec<ChatMessage>, params: SamplingParams) -> UnitStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let router = self.clone();
        tokio::spawn(async move {
            router.drive(messages, params, tx).await;
        });
        Box::pin(ReceiverStream::new(rx))
    }

    async fn drive(
        &self,
        messages: Vec<ChatMessage>,
        params: SamplingParams,
        tx: mpsc::Sender<Result<StreamUnit, ProviderError>>,
    ) {
        let (max_retries, retry_delay) = {
            let state = self.state();
            (state.max_retries, state.retry_delay)
        };

        let mut last_error = None;
        for attempt in 0..max_retries {
            let Some(model) = self.select_model() else {
                break;
            };
            info!(model = %model, attempt = attempt + 1, max_retries, "Routing request");

            let request = ChatRequest::new(messages.clone()).with_params(params.clone());
            let outcome = self.attempt(&model, request, &mut Sink::Forward(&tx)).await;
            match outcome {
                Attempt::Completed | Attempt::Cancelled => return,
                Attempt::Failed(e) if !e.is_retryable() => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                Attempt::Failed(e) => {
                    warn!(model = %model, "Attempt failed: {}", e);
                    last_error = Some(e);
                }
            }

            if attempt + 1 < max_retries {
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }

        let error = last_error.unwrap_or_else(|| ProviderError::no_available_model("no available model"));
        let _ = tx.send(Err(error)).await;
    }

    /// One attempt against `model` under the per-attempt timeout.
    async fn attempt(&self, model: &str, request: ChatRequest, sink: &mut Sink<'_>) -> Attempt {
        let Some((backend, target_model)) = self.inner.manager.resolve_target(model) else {
            return Attempt::Failed(ProviderError::unknown_backend(model));
        };
        let backend_name = backend.name().to_string();
        let backend_label = backend.label().to_string();
        let request = request.with_model(&target_model);
        let timeout = self.state().timeout;
        let watcher = sink.watcher();
        let started = Instant::now();

        let run = async {
            let mut stream = backend.chat_completion(request).await?;
            while let Some(unit) = stream.next().await {
                if !sink.push(unit?).await {
                    return Ok(false);
                }
            }
            Ok::<bool, ProviderError>(true)
        };
        let consumer_gone = async {
            match &watcher {
                Some(tx) => tx.closed().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            _ = consumer_gone => return Attempt::Cancelled,
            outcome = tokio::time::timeout(timeout, run) => outcome,
        };

        match outcome {
            Ok(Ok(true)) => {
                self.record(model, &backend_name, Some(started.elapsed()));
                Attempt::Completed
            }
            Ok(Ok(false)) => Attempt::Cancelled,
            Ok(Err(e)) => {
                self.record(model, &backend_name, None);
                Attempt::Failed(e)
            }
            Err(_) => {
                self.record(model, &backend_name, None);
                Attempt::Failed(ProviderError::connection(
                    &backend_label,
                    format!("model {} timed out after {:?}", model, timeout),
                ))
            }
        }
    }

    /// Ask the first `count` available models at once.
    ///
    /// Each answer is drained fully before anything of it is yielded; answers
    /// come out whole, one model after another, in completion order. Failed
    /// models contribute nothing. Dropping the stream cancels unfinished models.
    pub fn concurrent_request(
        &self,
        messages: Vec<ChatMessage>,
        params: SamplingParams,
        count: usize,
    ) -> Result<ConcurrentStream, ProviderError> {
        let selected: Vec<String> = self.available_models().into_iter().take(count).collect();
        if selected.is_empty() {
            return Err(ProviderError::no_available_model("no available model"));
        }

        let mut tasks = JoinSet::new();
        for model in selected {
            let router = self.clone();
            let request = ChatRequest::new(messages.clone()).with_params(params.clone());
            tasks.spawn(async move {
                let mut units = Vec::new();
                let outcome = router.attempt(&model, request, &mut Sink::Collect(&mut units)).await;
                match outcome {
                    Attempt::Completed => {}
                    Attempt::Failed(e) => {
                        error!(model = %model, "Concurrent request failed: {}", e);
                        units.clear();
                    }
                    Attempt::Cancelled => units.clear(),
                }
                (model, units)
            });
        }

        let merged = futures::stream::unfold(tasks, |mut tasks| async move {
            loop {
                match tasks.join_next().await? {
                    Ok((model, units)) => {
                        let batch = futures::stream::iter(units.into_iter().map(move |unit| (model.clone(), unit)));
                        return Some((batch, tasks));
                    }
                    Err(e) => error!("Concurrent task failed: {}", e),
                }
            }
        })
        .flatten();

        Ok(Box::pin(merged))
    }
}

/// Stats for `models`, keeping entries from `existing` where present.
fn build_stats(
    manager: &BackendManager,
    models: &[String],
    mut existing: HashMap<String, ModelStat>,
) -> HashMap<String, ModelStat> {
    models
        .iter()
        .map(|model| {
            let stat = existing.remove(model).unwrap_or_else(|| {
                let backend = manager.target_name(model).unwrap_or_default();
                ModelStat::new(model, &backend)
            });
            (model.clone(), stat)
        })
        .collect()
}
