//! First-to-finish fan-out across backends.

use super::BackendManager;
use crate::error::ProviderError;
use crate::stream::collect_units;
use crate::types::{join_content, ChatMessage, ChatRequest, SamplingParams, StreamUnit};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The winning answer of a race.
#[derive(Debug, Clone)]
pub struct RaceOutcome {
    /// Name the winner was requested under.
    pub backend: String,
    pub units: Vec<StreamUnit>,
}

impl RaceOutcome {
    pub fn content(&self) -> String {
        join_content(&self.units)
    }
}

impl BackendManager {
    /// Ask every named backend (all registered ones when `names` is empty) and
    /// keep the first complete, non-empty answer.
    ///
    /// Losers are cancelled and their results discarded. Unknown names fail
    /// before anything is sent.
    pub async fn race(
        &self,
        names: &[String],
        messages: Vec<ChatMessage>,
        params: SamplingParams,
    ) -> Result<RaceOutcome, ProviderError> {
        let names = if names.is_empty() { self.names() } else { names.to_vec() };

        let mut contenders = Vec::with_capacity(names.len());
        for name in names {
            let backend = self.get(&name).ok_or_else(|| ProviderError::unknown_backend(&name))?;
            contenders.push((name, backend));
        }
        if contenders.is_empty() {
            return Err(ProviderError::no_available_model("no backend to race"));
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for (name, backend) in contenders {
            let request = ChatRequest::new(messages.clone()).with_params(params.clone());
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let attempt = async {
                    let stream = backend.chat_completion(request).await?;
                    collect_units(stream).await
                };
                let result = tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = attempt => Some(result),
                };
                (name, result)
            });
        }

        let mut last_error = None;
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    warn!("Race task failed: {}", e);
                    continue;
                }
            };

            match result {
                Some(Ok(units)) if !join_content(&units).is_empty() => {
                    cancel.cancel();
                    tasks.abort_all();
                    info!(backend = %name, units = units.len(), "Race won");
                    return Ok(RaceOutcome { backend: name, units });
                }
                Some(Ok(_)) => debug!(backend = %name, "Discarding empty answer"),
                Some(Err(e)) => {
                    warn!(backend = %name, "Race contender failed: {}", e);
                    last_error = Some(e);
                }
                None => {}
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::no_available_model("no backend produced an answer")))
    }
}
