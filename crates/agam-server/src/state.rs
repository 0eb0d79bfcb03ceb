use std::sync::Arc;

use agam::Dispatcher;

/// Multipart framing allowance on top of the configured upload total.
pub const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Largest request body accepted on the upload routes.
    pub fn body_limit(&self) -> usize {
        let total = usize::try_from(self.dispatcher.limits().max_total_size).unwrap_or(usize::MAX);
        total.saturating_add(MULTIPART_OVERHEAD)
    }
}
