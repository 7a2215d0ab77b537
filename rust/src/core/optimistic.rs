// Snapshot / apply / confirm-or-restore for optimistic mutations.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::error::BackendResult;

/// A pending mutation holding the state it replaced. Resolves exactly once: `confirm` drops the
/// snapshot, `revert` hands it back for restoration. While alive it also holds the key's slot in
/// the action queue, so a later action on the same key waits for this one to settle.
pub struct OptimisticAction<T> {
    key: String,
    snapshot: Option<T>,
    _slot: OwnedMutexGuard<()>,
}

impl<T> OptimisticAction<T> {
    pub fn snapshot(&self) -> Option<&T> {
        self.snapshot.as_ref()
    }

    pub fn confirm(mut self) {
        self.snapshot = None;
    }

    pub fn revert(mut self) -> Option<T> {
        self.snapshot.take()
    }
}

impl<T> Drop for OptimisticAction<T> {
    fn drop(&mut self) {
        if self.snapshot.is_some() {
            tracing::warn!(key = %self.key, "optimistic action dropped unresolved");
        }
    }
}

/// Per-key serialization of optimistic actions. Distinct keys run concurrently.
#[derive(Default)]
pub struct OptimisticCoordinator {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OptimisticCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(g) => g,
                Err(poison) => poison.into_inner(),
            };
            // Only entries someone still holds or waits on are worth keeping.
            slots.retain(|k, m| k == key || Arc::strong_count(m) > 1);
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Wait for the key, then capture the snapshot. The snapshot is taken only after earlier
    /// actions on the key have settled.
    pub async fn begin<T>(&self, key: &str, snapshot: impl FnOnce() -> T) -> OptimisticAction<T> {
        let slot = self.acquire(key).await;
        OptimisticAction {
            key: key.to_string(),
            snapshot: Some(snapshot()),
            _slot: slot,
        }
    }

    /// Full cycle: snapshot, apply locally, run the request, restore the snapshot on failure.
    pub async fn run<T, R, Fut>(
        &self,
        key: &str,
        snapshot: impl FnOnce() -> T,
        apply: impl FnOnce(&T),
        restore: impl FnOnce(T),
        request: impl FnOnce() -> Fut,
    ) -> BackendResult<R>
    where
        Fut: Future<Output = BackendResult<R>>,
    {
        let action = self.begin(key, snapshot).await;
        if let Some(before) = action.snapshot() {
            apply(before);
        }
        match request().await {
            Ok(v) => {
                action.confirm();
                Ok(v)
            }
            Err(e) => {
                tracing::warn!(key, %e, "optimistic action failed; reverting");
                if let Some(before) = action.revert() {
                    restore(before);
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_keys(&self) -> usize {
        match self.slots.lock() {
            Ok(g) => g.len(),
            Err(poison) => poison.into_inner().len(),
        }
    }
}
