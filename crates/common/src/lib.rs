pub mod config;
pub mod error;
pub mod logger;

// Re-export commonly used types
pub use config::{AppConfig, EmbeddingProvider};
pub use error::CodeSearchError;
pub type Result<T> = std::result::Result<T, CodeSearchError>;
