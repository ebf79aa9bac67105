use std::sync::Arc;

use crate::admission::Gate;

// app's shared state
pub struct AppState {
    pub client: reqwest::Client, // talks to the protected upstream
    pub upstream: String,        // base URL, no trailing slash
    pub gate: Arc<Gate>,
}
