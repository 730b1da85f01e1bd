//! Per-model routing statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Failures needed before a model can be flagged unavailable.
pub const UNAVAILABLE_FAILURE_THRESHOLD: u64 = 3;
/// Success rate below which a model with enough failures is flagged unavailable.
pub const UNAVAILABLE_SUCCESS_RATE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelStat {
    pub model_id: String,
    /// Registration name of the owning backend.
    pub backend: String,
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Sum of successful attempt latencies.
    pub total_latency: Duration,
    pub last_used: Option<DateTime<Utc>>,
    pub available: bool,
}

impl ModelStat {
    pub fn new(model_id: &str, backend: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            backend: backend.to_string(),
            request_count: 0,
            success_count: 0,
            failure_count: 0,
            total_latency: Duration::ZERO,
            last_used: None,
            available: true,
        }
    }

    /// 1.0 before any request.
    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 1.0;
        }
        self.success_count as f64 / self.request_count as f64
    }

    /// Seconds per success; infinite before the first success.
    pub fn average_latency(&self) -> f64 {
        if self.success_count == 0 {
            return f64::INFINITY;
        }
        self.total_latency.as_secs_f64() / self.success_count as f64
    }

    /// Returns true when this update flagged the model unavailable.
    pub fn record_success(&mut self, latency: Duration) -> bool {
        self.request_count += 1;
        self.success_count += 1;
        self.total_latency += latency;
        self.last_used = Some(Utc::now());
        self.refresh_availability()
    }

    /// Returns true when this update flagged the model unavailable.
    pub fn record_failure(&mut self) -> bool {
        self.request_count += 1;
        self.failure_count += 1;
        self.last_used = Some(Utc::now());
        self.refresh_availability()
    }

    fn refresh_availability(&mut self) -> bool {
        if self.available
            && self.failure_count >= UNAVAILABLE_FAILURE_THRESHOLD
            && self.success_rate() < UNAVAILABLE_SUCCESS_RATE
        {
            self.available = false;
            return true;
        }
        false
    }

    /// Counters are kept.
    pub fn reset_availability(&mut self) {
        self.available = true;
    }

    pub fn snapshot(&self) -> ModelStatSnapshot {
        let average = self.average_latency();
        ModelStatSnapshot {
            model_id: self.model_id.clone(),
            backend: self.backend.clone(),
            request_count: self.request_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            success_rate: self.success_rate(),
            average_latency_secs: average.is_finite().then_some(average),
            last_used: self.last_used,
            available: self.available,
        }
    }
}

/// Serializable view of a [`ModelStat`] with derived fields.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelStatSnapshot {
    pub model_id: String,
    pub backend: String,
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    /// `None` until the first success.
    pub average_latency_secs: Option<f64>,
    pub last_used: Option<DateTime<Utc>>,
    pub available: bool,
}
