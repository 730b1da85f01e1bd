//! modelmesh - Route chat requests across interchangeable LLM backends.
//!
//! Features:
//! - One streaming contract over OpenAI, DeepSeek, GLM, OpenRouter and custom endpoints
//! - Backend manager with persisted configuration and composite `backend:model` lookups
//! - Multi-model router with retry, failover and per-model statistics
//! - Curated free-model registry with live OpenRouter discovery

pub mod backend;
pub mod config;
pub mod error;
pub mod free_models;
pub mod http;
pub mod logger;
pub mod manager;
pub mod router;
pub mod store;
pub mod stream;
pub mod types;

pub use backend::{create_backend, Backend, ModelPinner};
pub use error::{ErrorKind, ProviderError};
pub use free_models::{FreeModel, FreeModelRegistry, UseCase};
pub use manager::{BackendEnv, BackendManager};
pub use router::{MultiModelRouter, RoutingStrategy};
pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use stream::UnitStream;
pub use types::{BackendConfig, BackendKind, ChatMessage, ChatRequest, ModelDescriptor, SamplingParams, StreamUnit};
