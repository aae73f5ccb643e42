pub mod chunker;
pub mod config;
pub mod documents;
pub mod error;
pub mod retry;
pub mod types;

pub use chunker::Chunker;
pub use config::DocqaConfig;
pub use documents::DocumentStore;
pub use error::{DocqaError, Result};
pub use retry::{RetryPolicy, ServiceKind};
pub use types::*;
