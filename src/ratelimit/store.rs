//! Storage backends for request logs.

use dashmap::DashMap;

use super::log::RequestLog;
use crate::error::Result;

/// Trait for request log storage.
///
/// The in-memory [`MemoryStore`] is the default. A shared external store
/// with atomic primitives can implement the same trait to back the limiter
/// across several processes.
pub trait RequestStore: Send + Sync + 'static {
    /// Run `f` on the log for `identifier`, creating an empty log if absent.
    ///
    /// Must be atomic with respect to every other call touching the same
    /// identifier, including [`RequestStore::retain`].
    fn update<R, F>(&self, identifier: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut RequestLog) -> R;

    /// A copy of the log for `identifier`, if one exists.
    fn snapshot(&self, identifier: &str) -> Result<Option<RequestLog>>;

    /// Replace the log for `identifier` with an empty one.
    fn reset(&self, identifier: &str) -> Result<()>;

    /// Remove every log.
    fn clear(&self) -> Result<()>;

    /// Keep only the logs for which `keep` returns `true`.
    ///
    /// Returns the number of logs removed.
    fn retain<F>(&self, keep: F) -> Result<usize>
    where
        F: FnMut(&str, &RequestLog) -> bool;

    /// Number of stored logs.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sharded in-memory store.
///
/// Each identifier lives in one `DashMap` shard; updates hold that shard's
/// lock for the duration of the closure, so checks for different
/// identifiers mostly proceed in parallel.
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: DashMap<String, RequestLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestStore for MemoryStore {
    fn update<R, F>(&self, identifier: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut RequestLog) -> R,
    {
        // Skip the key allocation on the hot path when the log already exists.
        if let Some(mut log) = self.logs.get_mut(identifier) {
            return Ok(f(log.value_mut()));
        }

        let mut log = self.logs.entry(identifier.to_owned()).or_default();
        Ok(f(log.value_mut()))
    }

    fn snapshot(&self, identifier: &str) -> Result<Option<RequestLog>> {
        Ok(self.logs.get(identifier).map(|log| log.value().clone()))
    }

    fn reset(&self, identifier: &str) -> Result<()> {
        self.logs.insert(identifier.to_owned(), RequestLog::new());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.logs.clear();
        Ok(())
    }

    fn retain<F>(&self, mut keep: F) -> Result<usize>
    where
        F: FnMut(&str, &RequestLog) -> bool,
    {
        let mut removed = 0;
        self.logs.retain(|identifier, log| {
            let kept = keep(identifier, log);
            if !kept {
                removed += 1;
            }
            kept
        });
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.logs.len()
    }
}
