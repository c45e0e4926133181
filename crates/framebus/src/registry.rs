use crate::errors::{FrameBusError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Something a registry owns and must release on shutdown.
pub trait Teardown {
    fn close(&self);
    fn unlink(&self) -> Result<()>;
}

/// Per-process table of named handles.
///
/// Lookups hand out `Arc` clones so a handle stays usable by a worker even
/// after it is removed from the table.
pub(crate) struct Registry<T> {
    kind: &'static str,
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T: Teardown> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries().get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<T>> {
        self.get(name)
            .ok_or_else(|| FrameBusError::NotRegistered(name.to_string()))
    }

    /// Return the existing entry, or build and store a new one.
    ///
    /// `check` validates an existing entry; `build` runs with the table locked
    /// so two threads registering the same name cannot both create it.
    pub fn get_or_insert_with<C, B>(&self, name: &str, check: C, build: B) -> Result<Arc<T>>
    where
        C: FnOnce(&T) -> Result<()>,
        B: FnOnce() -> Result<T>,
    {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(name) {
            check(existing)?;
            return Ok(Arc::clone(existing));
        }

        let entry = Arc::new(build()?);
        entries.insert(name.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.entries().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Close every entry without unlinking and empty the table.
    pub fn close_all(&self) {
        let drained: Vec<(String, Arc<T>)> = self.entries().drain().collect();
        for (name, entry) in &drained {
            entry.close();
            tracing::debug!(kind = self.kind, name = %name, "Closed");
        }
    }

    /// Unlink every entry exactly once and empty the table.
    ///
    /// Failures are logged and counted; the remaining entries are still
    /// processed. Returns the number of failures.
    pub fn cleanup_all(&self) -> usize {
        let drained: Vec<(String, Arc<T>)> = self.entries().drain().collect();
        let total = drained.len();
        let mut errors = 0;

        for (name, entry) in drained {
            if let Err(e) = entry.unlink() {
                errors += 1;
                tracing::error!(kind = self.kind, name = %name, error = %e, "Cleanup failed");
            }
        }

        if errors > 0 {
            tracing::warn!(
                "Cleaned up {}/{} {} buffers with {} errors",
                total - errors,
                total,
                self.kind,
                errors
            );
        } else if total > 0 {
            tracing::info!("Cleaned up {} {} buffers", total, self.kind);
        }

        errors
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Fake {
        fail: bool,
        closed: AtomicUsize,
        unlinked: AtomicUsize,
    }

    impl Teardown for Fake {
        fn close(&self) {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }

        fn unlink(&self) -> Result<()> {
            self.unlinked.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                Err(FrameBusError::NotFound("fake".into()))
            } else {
                Ok(())
            }
        }
    }

    fn insert(registry: &Registry<Fake>, name: &str, fail: bool) -> Arc<Fake> {
        registry
            .get_or_insert_with(
                name,
                |_| Ok(()),
                || {
                    Ok(Fake {
                        fail,
                        ..Default::default()
                    })
                },
            )
            .unwrap()
    }

    #[test]
    fn test_existing_entry_is_returned() {
        let registry = Registry::new("test");
        let first = insert(&registry, "a", false);
        let second = insert(&registry, "a", false);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_check_rejects_existing_entry() {
        let registry = Registry::new("test");
        insert(&registry, "a", false);

        let result = registry.get_or_insert_with(
            "a",
            |_| Err(FrameBusError::InvalidShape("nope".into())),
            || Ok(Fake::default()),
        );
        assert!(matches!(result, Err(FrameBusError::InvalidShape(_))));
    }

    #[test]
    fn test_require_unknown_name() {
        let registry: Registry<Fake> = Registry::new("test");
        assert!(matches!(
            registry.require("ghost"),
            Err(FrameBusError::NotRegistered(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_cleanup_all_counts_failures_and_continues() {
        let registry = Registry::new("test");
        let ok_a = insert(&registry, "a", false);
        let bad = insert(&registry, "b", true);
        let ok_c = insert(&registry, "c", false);

        assert_eq!(registry.cleanup_all(), 1);
        assert_eq!(ok_a.unlinked.load(Ordering::Relaxed), 1);
        assert_eq!(bad.unlinked.load(Ordering::Relaxed), 1);
        assert_eq!(ok_c.unlinked.load(Ordering::Relaxed), 1);
        assert_eq!(registry.len(), 0);

        // Already emptied: nothing is unlinked twice
        assert_eq!(registry.cleanup_all(), 0);
        assert_eq!(ok_a.unlinked.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_close_all_does_not_unlink() {
        let registry = Registry::new("test");
        let entry = insert(&registry, "a", false);

        registry.close_all();
        assert_eq!(entry.closed.load(Ordering::Relaxed), 1);
        assert_eq!(entry.unlinked.load(Ordering::Relaxed), 0);
        assert!(registry.names().is_empty());
    }
}
