use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-filename mutual exclusion for ingest and delete.
///
/// Entries nobody holds or waits on are pruned on the next acquire.
#[derive(Debug, Clone, Default)]
pub struct SourceLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, filename: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut registry = match self.inner.lock() {
                Ok(registry) => registry,
                Err(poisoned) => poisoned.into_inner(),
            };
            registry.retain(|key, lock| key == filename || Arc::strong_count(lock) > 1);
            registry
                .entry(filename.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().map(|registry| registry.len()).unwrap_or(0)
    }
}
