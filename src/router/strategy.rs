//! Model selection strategies.

use super::stats::ModelStat;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Cycle over the currently available models.
    #[default]
    RoundRobin,
    Random,
    /// Fewest requests so far.
    LeastUsed,
    /// Lowest average latency; models without a success rank last.
    FastestFirst,
    /// Highest success rate.
    Failover,
}

impl RoutingStrategy {
    pub const ALL: [RoutingStrategy; 5] = [
        RoutingStrategy::RoundRobin,
        RoutingStrategy::Random,
        RoutingStrategy::LeastUsed,
        RoutingStrategy::FastestFirst,
        RoutingStrategy::Failover,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::RoundRobin => "round_robin",
            RoutingStrategy::Random => "random",
            RoutingStrategy::LeastUsed => "least_used",
            RoutingStrategy::FastestFirst => "fastest_first",
            RoutingStrategy::Failover => "failover",
        }
    }

    /// Pick one candidate. `candidates` holds only available models, in enabled order.
    /// Ties resolve to the earliest candidate.
    pub(crate) fn select<'a>(&self, candidates: &[&'a ModelStat], cursor: &mut usize) -> Option<&'a ModelStat> {
        if candidates.is_empty() {
            return None;
        }

        match self {
            RoutingStrategy::RoundRobin => {
                let picked = candidates[*cursor % candidates.len()];
                *cursor = cursor.wrapping_add(1);
                Some(picked)
            }
            RoutingStrategy::Random => candidates.choose(&mut rand::rng()).copied(),
            RoutingStrategy::LeastUsed => first_best(candidates, |a, b| a.request_count.cmp(&b.request_count)),
            RoutingStrategy::FastestFirst => first_best(candidates, |a, b| {
                a.average_latency().partial_cmp(&b.average_latency()).unwrap_or(Ordering::Equal)
            }),
            RoutingStrategy::Failover => first_best(candidates, |a, b| {
                b.success_rate().partial_cmp(&a.success_rate()).unwrap_or(Ordering::Equal)
            }),
        }
    }
}

/// Earliest candidate that no later candidate strictly beats.
fn first_best<'a, F>(candidates: &[&'a ModelStat], cmp: F) -> Option<&'a ModelStat>
where
    F: Fn(&ModelStat, &ModelStat) -> Ordering,
{
    let mut best = *candidates.first()?;
    for candidate in &candidates[1..] {
        if cmp(candidate, best) == Ordering::Less {
            best = candidate;
        }
    }
    Some(best)
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        RoutingStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| format!("unknown routing strategy: {}", s))
    }
}
