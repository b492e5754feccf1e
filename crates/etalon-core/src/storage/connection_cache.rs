use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::database::{open_database, ConnectionPool};

struct CacheSlot {
    pool: Arc<ConnectionPool>,
    last_used: Instant,
    refs: usize,
}

/// Cache of secondary-database connections used for cross-database quality
/// lookups. Entries expire after a fixed TTL once their reference count
/// drops to zero; `sweep` closes evicted connections. A close failure is
/// logged and never surfaced to the caller.
pub struct ConnectionCache {
    ttl: Duration,
    slots: Mutex<HashMap<PathBuf, CacheSlot>>,
}

impl ConnectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Borrow a pooled connection for `path`, opening it on first use.
    /// Pair every checkout with a `release`.
    pub fn checkout(&self, path: &Path) -> Result<Arc<ConnectionPool>> {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(path) {
            slot.refs += 1;
            slot.last_used = Instant::now();
            return Ok(Arc::clone(&slot.pool));
        }

        let pool = Arc::new(open_database(path)?);
        slots.insert(
            path.to_path_buf(),
            CacheSlot {
                pool: Arc::clone(&pool),
                last_used: Instant::now(),
                refs: 1,
            },
        );
        Ok(pool)
    }

    pub fn release(&self, path: &Path) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(path) {
            slot.refs = slot.refs.saturating_sub(1);
            slot.last_used = Instant::now();
        }
    }

    /// Evict entries whose TTL elapsed with no outstanding references,
    /// closing their connections. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let ttl = self.ttl;
        let expired: Vec<PathBuf> = slots
            .iter()
            .filter(|(_, slot)| slot.refs == 0 && slot.last_used.elapsed() >= ttl)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &expired {
            if let Some(slot) = slots.remove(path) {
                match Arc::try_unwrap(slot.pool) {
                    Ok(pool) => {
                        if let Err(err) = pool.close() {
                            warn!(path = %path.display(), error = %err, "failed to close evicted connection");
                        }
                    }
                    Err(_) => {
                        debug!(path = %path.display(), "evicted connection still shared, dropping handle");
                    }
                }
            }
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_reuses_open_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quality.db");
        let cache = ConnectionCache::new(Duration::from_secs(60));

        let first = cache.checkout(&path).unwrap();
        let second = cache.checkout(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_skips_referenced_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quality.db");
        let cache = ConnectionCache::new(Duration::from_secs(0));

        let pool = cache.checkout(&path).unwrap();
        assert_eq!(cache.sweep(), 0, "held reference must not be evicted");

        drop(pool);
        cache.release(&path);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }
}
