//! Disposal bag owned by each cached tree node.

use parking_lot::Mutex;

type Disposer = Box<dyn FnOnce() + Send>;

/// Runs registered disposers once, in registration order.
///
/// Disposers added after `dispose` run immediately.
pub struct DisposableStore {
    disposers: Mutex<Option<Vec<Disposer>>>,
}

impl DisposableStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            disposers: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn add(&self, disposer: impl FnOnce() + Send + 'static) {
        let mut disposers = self.disposers.lock();
        match disposers.as_mut() {
            Some(pending) => pending.push(Box::new(disposer)),
            None => {
                drop(disposers);
                disposer();
            }
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposers.lock().is_none()
    }

    pub fn dispose(&self) {
        let pending = self.disposers.lock().take();
        for disposer in pending.into_iter().flatten() {
            disposer();
        }
    }
}

impl Default for DisposableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DisposableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let disposers = self.disposers.lock();
        f.debug_struct("DisposableStore")
            .field("pending", &disposers.as_ref().map_or(0, Vec::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn disposes_once_and_runs_late_additions_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let store = DisposableStore::new();
        let first = count.clone();
        store.add(move || {
            first.fetch_add(1, Ordering::SeqCst);
        });

        store.dispose();
        store.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(store.is_disposed());

        let late = count.clone();
        store.add(move || {
            late.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }
}
