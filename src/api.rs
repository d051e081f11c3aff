//! HTTP and WebSocket API for the survey service

mod handlers;
mod types;
mod ws;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::runtime::{DeferredQueue, SurveyRuntime};
use std::time::Duration;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: SurveyRuntime,
    pub deferred: DeferredQueue,
    /// Pause between the completion notice and closing a duplex session
    pub close_grace: Duration,
}

impl AppState {
    pub fn new(runtime: SurveyRuntime, close_grace: Duration) -> Self {
        Self {
            deferred: DeferredQueue::new(runtime.clone()),
            runtime,
            close_grace,
        }
    }
}
