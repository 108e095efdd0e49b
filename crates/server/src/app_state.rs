use std::sync::Arc;

use coordinator::Coordinator;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) max_request_bytes: usize,
}
