//! docqa API crate - axum HTTP transport over `DocqaService`.
//!
//! Exposes document upload and listing, ingestion, simple and structured
//! queries, index clearing, and health/info endpoints.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
