// ABOUTME: The integration seam domain modules implement to get durability for their live store.
// ABOUTME: Clone-before-handoff persistence, load with prune and post-load hooks, optional rate limiting.

use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use strongbox_core::PersistableStore;

use crate::engine::{EngineError, StoreEngine};
use crate::rate_limit::RateLimiter;

/// What happened to a `persist()` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Written,
    /// The write was attempted and failed; the cause has been logged.
    Failed,
    /// Skipped by the rate limiter without touching disk.
    Dropped,
}

impl PersistOutcome {
    pub fn is_written(self) -> bool {
        self == PersistOutcome::Written
    }
}

/// Implemented by every domain module that owns a persisted store.
///
/// The module keeps its live store behind a lock and mutates it freely.
/// `persist()` freezes a deep clone under a read lock and hands only the
/// clone to the engine, so the worker never races with domain mutations.
///
/// A client is bound by creating it with `Arc::new_cyclic` and calling
/// [`PersistenceService::get_or_create_persistence`](crate::PersistenceService::get_or_create_persistence)
/// with the weak handle during construction.
#[async_trait]
pub trait PersistenceClient: Send + Sync + 'static {
    type Store: PersistableStore;

    fn persistable_store(&self) -> &RwLock<Self::Store>;

    fn persistence(&self) -> &StoreEngine<Self::Store>;

    /// Returning a limiter opts the client into rate-limited persistence and a
    /// final flush of dropped writes at shutdown.
    fn rate_limiter(&self) -> Option<&RateLimiter> {
        None
    }

    /// Migrate or validate a loaded snapshot before it is applied.
    fn prune(&self, persisted: Self::Store) -> Self::Store {
        persisted
    }

    fn on_persisted_applied(&self) {}

    /// Deep clone of the live store taken under its read lock.
    fn snapshot(&self) -> Self::Store {
        self.persistable_store()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_clone()
    }

    /// Load the persisted snapshot and merge it into the live store.
    /// Returns `Ok(false)` when nothing was persisted; the live store keeps
    /// its defaults.
    async fn read_persisted(&self) -> Result<bool, EngineError> {
        let Some(persisted) = self.persistence().read_async().await? else {
            return Ok(false);
        };

        let pruned = self.prune(persisted);
        {
            let mut store = self
                .persistable_store()
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            store.apply_persisted(pruned);
        }
        self.on_persisted_applied();
        Ok(true)
    }

    fn persist(&self) -> BoxFuture<'static, PersistOutcome> {
        self.persist_at(Instant::now())
    }

    /// `persist()` with an explicit clock reading for the rate limiter.
    fn persist_at(&self, now: Instant) -> BoxFuture<'static, PersistOutcome> {
        let Some(limiter) = self.rate_limiter() else {
            return self.write_snapshot();
        };

        match limiter.try_acquire_at(now) {
            // Released on the worker when the write finishes, not with the returned future
            Some(permit) => {
                let pending = self
                    .persistence()
                    .persist_async_guarded(self.snapshot(), permit);
                Box::pin(async move { outcome_of(pending.await) })
            }
            None => {
                tracing::trace!(
                    type_tag = <Self::Store as PersistableStore>::TYPE_TAG,
                    "persist request dropped by rate limiter"
                );
                Box::pin(future::ready(PersistOutcome::Dropped))
            }
        }
    }

    /// Clone the live store and schedule its write, bypassing any rate limiter.
    fn write_snapshot(&self) -> BoxFuture<'static, PersistOutcome> {
        let pending = self.persistence().persist_async(self.snapshot());
        Box::pin(async move { outcome_of(pending.await) })
    }

    /// Write whatever a rate limiter dropped since the last accepted write.
    /// Returns `false` only if that final write failed.
    async fn flush_on_shutdown(&self) -> bool {
        let Some(limiter) = self.rate_limiter() else {
            return true;
        };
        if !limiter.take_dropped() {
            return true;
        }

        tracing::info!(
            path = %self.persistence().paths().primary.display(),
            "flushing dropped write before shutdown"
        );
        self.write_snapshot().await.is_written()
    }
}

fn outcome_of(result: Result<(), EngineError>) -> PersistOutcome {
    match result {
        Ok(()) => PersistOutcome::Written,
        // Already logged by the engine
        Err(_) => PersistOutcome::Failed,
    }
}
