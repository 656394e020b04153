//! Shared Axum state: just the session registry. Config and the assistant
//! registry are their own process-wide singletons (`swe_core::config`,
//! `swe_core::assistant`), so they don't need to ride in `AppState`.

use std::sync::Arc;

use swe_core::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}
