//! code-search embedding adapters
//!
//! Text to fixed-dimension vector, behind the [`Embedder`] trait.

mod client;
mod embedder;
mod hashing;
mod types;

pub use client::OllamaEmbedder;
pub use embedder::{validate_embedding, Embedder, Embedding, TimedEmbedder};
pub use hashing::HashingEmbedder;
pub use types::{EmbedRequest, EmbedResponse};
