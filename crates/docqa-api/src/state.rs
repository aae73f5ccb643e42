//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use docqa_rag::DocqaService;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DocqaService>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: DocqaService) -> Self {
        Self::from_arc(Arc::new(service))
    }

    pub fn from_arc(service: Arc<DocqaService>) -> Self {
        Self {
            service,
            start_time: Instant::now(),
        }
    }
}
