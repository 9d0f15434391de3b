use std::sync::Arc;
use std::time::{Duration, Instant};

use application::{LocalTransport, RealtimeHub};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RealtimeHub>,
    pub transport: LocalTransport,
    pub cors_origins: Arc<Vec<String>>,
    started_at: Instant,
}

impl AppState {
    pub fn new(hub: Arc<RealtimeHub>, transport: LocalTransport, cors_origins: Vec<String>) -> Self {
        Self {
            hub,
            transport,
            cors_origins: Arc::new(cors_origins),
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
