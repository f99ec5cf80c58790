use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Per-provider call accounting shared between the retry executor and the
/// workflow state.
///
/// Counts survive resume: the engine seeds the counter from the loaded
/// checkpoint and folds a snapshot back at every save.
#[derive(Debug, Default)]
pub struct CallCounter {
    total: AtomicU64,
    per_provider: Mutex<HashMap<String, u64>>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from persisted usage so resumed runs keep accumulating.
    pub fn seeded(total: u64, per_provider: HashMap<String, u64>) -> Self {
        Self {
            total: AtomicU64::new(total),
            per_provider: Mutex::new(per_provider),
        }
    }

    pub fn record(&self, provider: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut map = self.per_provider.lock().unwrap();
        *map.entry(provider.to_string()).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn provider_calls(&self, provider: &str) -> u64 {
        self.per_provider
            .lock()
            .unwrap()
            .get(provider)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.per_provider.lock().unwrap().clone()
    }
}
