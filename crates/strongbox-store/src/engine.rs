// ABOUTME: Per-store async facade binding one canonical path to the shared I/O worker.
// ABOUTME: Schedules reads and writes of frozen snapshots and resolves envelopes back into typed stores.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use strongbox_core::{PersistableStore, ResolveError, ResolverRegistry, StoreError};
use thiserror::Error;

use crate::file_manager::{FileManagerError, StoreFileManager, StorePaths};
use crate::worker::{IoWorkerHandle, WorkerStopped};

/// Errors surfaced by a store engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not serialize {tag}: {source}")]
    Serialize {
        tag: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("file error: {0}")]
    File(#[from] FileManagerError),

    /// No usable resolver for the stored type tag. A wiring defect.
    #[error("unresolvable store: {0}")]
    Unresolvable(#[from] ResolveError),

    #[error(transparent)]
    WorkerStopped(#[from] WorkerStopped),

    /// The job panicked on the worker and never replied. The worker keeps running.
    #[error("io job panicked before replying")]
    JobPanicked,
}

/// Reads and writes one store through the shared I/O worker.
///
/// The engine never clones or touches a live store. Callers hand it an
/// already-frozen snapshot, which the worker owns until the write finishes.
pub struct StoreEngine<S: PersistableStore> {
    file_manager: Arc<StoreFileManager>,
    registry: Arc<ResolverRegistry>,
    worker: IoWorkerHandle,
    _store: PhantomData<fn() -> S>,
}

impl<S: PersistableStore> StoreEngine<S> {
    pub fn new(
        paths: StorePaths,
        sync_writes: bool,
        registry: Arc<ResolverRegistry>,
        worker: IoWorkerHandle,
    ) -> Self {
        Self {
            file_manager: Arc::new(StoreFileManager::new(paths, sync_writes)),
            registry,
            worker,
            _store: PhantomData,
        }
    }

    pub fn paths(&self) -> &StorePaths {
        self.file_manager.paths()
    }

    /// Schedule a read. The job is queued immediately; the returned future
    /// resolves to `None` when nothing usable is on disk and fails only when
    /// the stored type cannot be resolved.
    pub fn read_async(
        &self,
    ) -> impl Future<Output = Result<Option<S>, EngineError>> + Send + 'static {
        let file_manager = Arc::clone(&self.file_manager);
        let registry = Arc::clone(&self.registry);
        let submitted = self
            .worker
            .submit(move || read_blocking::<S>(&file_manager, &registry));

        async move {
            let reply = submitted?;
            reply.await.map_err(|_| EngineError::JobPanicked)?
        }
    }

    /// Schedule a write of `snapshot`. The job is queued immediately, so two
    /// calls made back to back commit in call order.
    pub fn persist_async(
        &self,
        snapshot: S,
    ) -> impl Future<Output = Result<(), EngineError>> + Send + 'static {
        self.persist_async_guarded(snapshot, ())
    }

    /// [`StoreEngine::persist_async`] that also hands `guard` to the worker.
    /// The guard is dropped on the worker as soon as the write finishes,
    /// whether or not anyone awaits the returned future.
    pub fn persist_async_guarded<G: Send + 'static>(
        &self,
        snapshot: S,
        guard: G,
    ) -> impl Future<Output = Result<(), EngineError>> + Send + 'static {
        let file_manager = Arc::clone(&self.file_manager);
        let submitted = self.worker.submit(move || {
            let result = write_blocking(&file_manager, snapshot);
            drop(guard);
            result
        });

        async move {
            let reply = submitted?;
            reply.await.map_err(|_| EngineError::JobPanicked)?
        }
    }
}

impl<S: PersistableStore> std::fmt::Debug for StoreEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEngine")
            .field("type_tag", &S::TYPE_TAG)
            .field("primary", &self.paths().primary)
            .finish()
    }
}

fn read_blocking<S: PersistableStore>(
    file_manager: &StoreFileManager,
    registry: &ResolverRegistry,
) -> Result<Option<S>, EngineError> {
    let path = &file_manager.paths().primary;

    let envelope = match file_manager.read() {
        Ok(Some(envelope)) => envelope,
        Ok(None) => {
            tracing::debug!(path = %path.display(), "no persisted data");
            return Ok(None);
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "reading store file failed");
            return Ok(None);
        }
    };

    match registry.decode_as::<S>(&envelope) {
        Ok(store) => {
            tracing::debug!(path = %path.display(), type_tag = S::TYPE_TAG, "read persisted store");
            Ok(Some(store))
        }
        Err(e) if e.is_corruption() => {
            tracing::warn!(path = %path.display(), error = %e, "store payload is unreadable");
            if let Err(qe) = file_manager.quarantine() {
                tracing::error!(path = %path.display(), error = %qe, "quarantine failed");
            }
            Ok(None)
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "cannot resolve persisted store");
            Err(e.into())
        }
    }
}

fn write_blocking<S: PersistableStore>(
    file_manager: &StoreFileManager,
    snapshot: S,
) -> Result<(), EngineError> {
    let path = &file_manager.paths().primary;

    let bytes = snapshot
        .to_envelope()
        .and_then(|envelope| envelope.to_bytes().map_err(StoreError::from))
        .map_err(|source| {
            tracing::error!(
                type_tag = S::TYPE_TAG,
                path = %path.display(),
                error = %source,
                "could not serialize store snapshot"
            );
            EngineError::Serialize {
                tag: S::TYPE_TAG,
                source,
            }
        })?;
    drop(snapshot);

    file_manager.write(&bytes).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "writing store file failed");
        EngineError::from(e)
    })
}
