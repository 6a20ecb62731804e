//! The unified LLM surface: the provider contract, the registry that
//! routes/fails over between providers, embeddings, and a mock provider
//! for tests and offline use.

pub mod embedding;
pub mod mock;
pub mod provider;
pub mod registry;

pub use embedding::{EmbeddingProvider, HashEmbedding, OllamaEmbedding};
pub use mock::{MockProvider, MockResponse};
pub use provider::{ChatProvider, ChatRequest, ChatResponse, Usage};
pub use registry::{ProviderEntry, ProviderRegistry};
