//! Session-scoped memo of span catalogs.
//!
//! Concurrent requests for the same span coalesce into one scan: the first
//! caller runs the computation, the rest block on the same cell and share its
//! result. A failed computation leaves the key empty so a later call retries.
//!
//! ```ignore
//! let cache = ResultCache::new();
//! let catalog = cache.get_or_compute(&id, || enumerate_span(&span, &source, &opts, &throttle))?;
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use scan_config::log_cache_debug;

use crate::span::{SpanCatalog, SpanId};

type Slot = Arc<OnceCell<Arc<SpanCatalog>>>;

/// Span catalogs computed during one scanning session.
#[derive(Debug, Default)]
pub struct ResultCache {
    slots: DashMap<SpanId, Slot>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the catalog for `span`, computing it at most once.
    pub fn get_or_compute<F, E>(&self, span: &SpanId, compute: F) -> Result<Arc<SpanCatalog>, E>
    where
        F: FnOnce() -> Result<SpanCatalog, E>,
    {
        // Clone the cell out so the shard lock is not held across the scan.
        let slot: Slot = self.slots.entry(span.clone()).or_default().clone();

        if let Some(hit) = slot.get() {
            log_cache_debug!("Catalog hit", span = tracing::field::display(span));
            return Ok(Arc::clone(hit));
        }

        let catalog = slot.get_or_try_init(|| {
            log_cache_debug!("Catalog miss, scanning", span = tracing::field::display(span));
            compute().map(Arc::new)
        })?;
        Ok(Arc::clone(catalog))
    }

    /// The catalog for `span` if one has been computed.
    pub fn get(&self, span: &SpanId) -> Option<Arc<SpanCatalog>> {
        self.slots
            .get(span)
            .and_then(|slot| slot.get().map(Arc::clone))
    }

    /// Number of spans with a computed catalog.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_concurrent_callers_compute_once() {
        let cache = Arc::new(ResultCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));
        let id = SpanId::from("/dev/sdb");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(&id, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok::<_, ()>(SpanCatalog::new(id.clone()))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|c| Arc::ptr_eq(c, &results[0])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failure_leaves_key_empty() {
        let cache = ResultCache::new();
        let id = SpanId::from("img");

        let err = cache.get_or_compute(&id, || Err::<SpanCatalog, _>("unreadable"));
        assert_eq!(err.unwrap_err(), "unreadable");
        assert!(cache.get(&id).is_none());
        assert!(cache.is_empty());

        let ok = cache
            .get_or_compute(&id, || Ok::<_, &str>(SpanCatalog::new(id.clone())))
            .unwrap();
        assert_eq!(ok.span, id);

        // Memoized: the second computation is never run.
        let again = cache
            .get_or_compute(&id, || -> Result<SpanCatalog, &str> { panic!("recomputed") })
            .unwrap();
        assert!(Arc::ptr_eq(&ok, &again));
    }
}
