//! Free model registry.
//!
//! A reference catalog of zero-cost models, independent of any backend:
//! - Built-in curated entries (never mutated)
//! - Custom entries added at runtime (shadow built-ins with the same id)
//! - Discovered entries from [`FreeModelScanner`] (lowest priority)
//!
//! Also holds the curated per-use-case recommendation lists.

mod catalog;
pub mod scanner;


pub use scanner::FreeModelScanner;

use crate::types::ModelDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use tracing::info;

/// A zero-cost model and its capabilities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FreeModel {
    pub id: String,
    pub name: String,
    /// Label of the service that hosts the model.
    pub backend: String,
    pub context_length: u32,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub function_calling: bool,
    #[serde(default)]
    pub description: String,
}

impl FreeModel {
    pub fn new(id: &str, name: &str, backend: &str, context_length: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            backend: backend.to_string(),
            context_length,
            reasoning: false,
            vision: false,
            function_calling: false,
            description: String::new(),
        }
    }

    pub fn with_reasoning(mut self) -> Self {
        self.reasoning = true;
        self
    }

    pub fn with_vision(mut self) -> Self {
        self.vision = true;
        self
    }

    pub fn with_function_calling(mut self) -> Self {
        self.function_calling = true;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Descriptor using the 75/25 budget split, zero price, streaming.
    pub fn to_descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::derived(&self.id, &self.name, &self.backend, self.context_length)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            reasoning: self.reasoning,
            vision: self.vision,
            function_calling: self.function_calling,
            free: true,
            context_length: self.context_length,
        }
    }
}

/// Capability summary for one model.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Capabilities {
    pub reasoning: bool,
    pub vision: bool,
    pub function_calling: bool,
    pub free: bool,
    pub context_length: u32,
}

/// Capability predicate. `None` fields match anything; `Some` must match exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityFilter {
    pub reasoning: Option<bool>,
    pub vision: Option<bool>,
    pub function_calling: Option<bool>,
    pub min_context: Option<u32>,
}

impl CapabilityFilter {
    pub fn matches(&self, model: &FreeModel) -> bool {
        self.reasoning.map_or(true, |r| model.reasoning == r)
            && self.vision.map_or(true, |v| model.vision == v)
            && self.function_calling.map_or(true, |f| model.function_calling == f)
            && self.min_context.map_or(true, |c| model.context_length >= c)
    }
}

/// Use cases with curated recommendations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseCase {
    #[default]
    General,
    Reasoning,
    Coding,
    Chat,
    Multimodal,
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UseCase::General => write!(f, "general"),
            UseCase::Reasoning => write!(f, "reasoning"),
            UseCase::Coding => write!(f, "coding"),
            UseCase::Chat => write!(f, "chat"),
            UseCase::Multimodal => write!(f, "multimodal"),
        }
    }
}

impl FromStr for UseCase {
    type Err = String;

    /// Unknown use cases fall back to [`UseCase::General`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "reasoning" => UseCase::Reasoning,
            "coding" => UseCase::Coding,
            "chat" => UseCase::Chat,
            "multimodal" => UseCase::Multimodal,
            _ => UseCase::General,
        })
    }
}

/// Entry counts per layer and capability.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub builtin: usize,
    pub custom: usize,
    pub discovered: usize,
    pub reasoning: usize,
    pub vision: usize,
    pub function_calling: usize,
}

/// Layered catalog of free models.
pub struct FreeModelRegistry {
    builtin: Vec<FreeModel>,
    custom: RwLock<BTreeMap<String, FreeModel>>,
    discovered: RwLock<BTreeMap<String, FreeModel>>,
}

impl FreeModelRegistry {
    pub fn new() -> Self {
        Self {
            builtin: catalog::builtin_models(),
            custom: RwLock::new(BTreeMap::new()),
            discovered: RwLock::new(BTreeMap::new()),
        }
    }

    /// Look up a model; custom entries win over built-ins, which win over discovered ones.
    pub fn get(&self, id: &str) -> Option<FreeModel> {
        if let Some(model) = self.custom.read().unwrap_or_else(PoisonError::into_inner).get(id) {
            return Some(model.clone());
        }
        if let Some(model) = self.builtin.iter().find(|m| m.id == id) {
            return Some(model.clone());
        }
        self.discovered.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }

    /// Every entry once: built-ins in catalog order, then custom, then discovered.
    pub fn all(&self) -> Vec<FreeModel> {
        let custom = self.custom.read().unwrap_or_else(PoisonError::into_inner);
        let discovered = self.discovered.read().unwrap_or_else(PoisonError::into_inner);

        let mut models: Vec<FreeModel> = self
            .builtin
            .iter()
            .map(|m| custom.get(&m.id).unwrap_or(m).clone())
            .collect();
        models.extend(custom.values().filter(|m| !self.is_builtin(&m.id)).cloned());
        models.extend(
            discovered
                .values()
                .filter(|m| !self.is_builtin(&m.id) && !custom.contains_key(&m.id))
                .cloned(),
        );
        models
    }

    /// Entries hosted by the given backend label (case-insensitive).
    pub fn by_backend(&self, backend: &str) -> Vec<FreeModel> {
        self.all()
            .into_iter()
            .filter(|m| m.backend.eq_ignore_ascii_case(backend))
            .collect()
    }

    pub fn filter(&self, filter: &CapabilityFilter) -> Vec<FreeModel> {
        self.all().into_iter().filter(|m| filter.matches(m)).collect()
    }

    /// Curated ids for a use case, in recommendation order.
    pub fn recommended_ids(&self, use_case: UseCase) -> &'static [&'static str] {
        catalog::recommended_ids(use_case)
    }

    /// Curated entries for a use case, in recommendation order.
    pub fn recommended(&self, use_case: UseCase) -> Vec<FreeModel> {
        catalog::recommended_ids(use_case).iter().filter_map(|id| self.get(id)).collect()
    }

    /// Descriptors for every entry, optionally limited to one backend label.
    pub fn descriptors(&self, backend: Option<&str>) -> Vec<ModelDescriptor> {
        let models = match backend {
            Some(backend) => self.by_backend(backend),
            None => self.all(),
        };
        models.iter().map(FreeModel::to_descriptor).collect()
    }

    /// Whether the id is a known free model or carries the `:free` suffix.
    pub fn is_free(&self, id: &str) -> bool {
        id.ends_with(":free") || self.get(id).is_some()
    }

    pub fn capabilities(&self, id: &str) -> Option<Capabilities> {
        self.get(id).map(|m| m.capabilities())
    }

    pub fn statistics(&self) -> RegistryStats {
        let all = self.all();
        RegistryStats {
            total: all.len(),
            builtin: self.builtin.len(),
            custom: self.custom.read().unwrap_or_else(PoisonError::into_inner).len(),
            discovered: self.discovered.read().unwrap_or_else(PoisonError::into_inner).len(),
            reasoning: all.iter().filter(|m| m.reasoning).count(),
            vision: all.iter().filter(|m| m.vision).count(),
            function_calling: all.iter().filter(|m| m.function_calling).count(),
        }
    }

    /// Add or replace a custom entry.
    pub fn add_custom(&self, model: FreeModel) {
        info!(model = %model.id, "Adding custom free model");
        self.custom
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.id.clone(), model);
    }

    /// Remove a custom entry. Built-ins cannot be removed.
    pub fn remove_custom(&self, id: &str) -> bool {
        let removed = self.custom.write().unwrap_or_else(PoisonError::into_inner).remove(id).is_some();
        if removed {
            info!(model = %id, "Removed custom free model");
        }
        removed
    }

    /// Replace the discovered layer.
    pub fn set_discovered(&self, models: Vec<FreeModel>) {
        let mut discovered = self.discovered.write().unwrap_or_else(PoisonError::into_inner);
        *discovered = models.into_iter().map(|m| (m.id.clone(), m)).collect();
    }

    /// Refresh the discovered layer from a scanner. Returns the number of entries found.
    pub async fn discover(&self, scanner: &FreeModelScanner) -> usize {
        let found = scanner.get_free_models(false).await;
        let count = found.len();
        self.set_discovered(found.as_ref().clone());
        count
    }

    fn is_builtin(&self, id: &str) -> bool {
        self.builtin.iter().any(|m| m.id == id)
    }
}

impl Default for FreeModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
