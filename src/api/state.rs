use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::MarginModelBits;
use crate::storage::TipStore;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TipStore>,
    pub bits_policy: MarginModelBits,
    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(store: Arc<dyn TipStore>, bits_policy: MarginModelBits) -> Self {
        Self {
            store,
            bits_policy,
            start_time: Utc::now(),
        }
    }

    /// Get API uptime in seconds
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
