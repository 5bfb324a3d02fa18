use std::sync::{Arc, RwLock};

use tokio::time::Instant;

/// Start instant of the cycle currently on air, shared with the serving side.
#[derive(Debug, Clone, Default)]
pub struct PlayoutClock {
    started: Arc<RwLock<Option<Instant>>>,
}

impl PlayoutClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        let mut started = self
            .started
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *started = Some(Instant::now());
    }

    /// Whole seconds since the last reset; zero before the first cycle.
    pub fn elapsed_secs(&self) -> u64 {
        let started = self
            .started
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        started.map(|at| at.elapsed().as_secs()).unwrap_or(0)
    }
}
