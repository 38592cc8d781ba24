// ABOUTME: Process-wide coordinator that binds domain clients to store engines.
// ABOUTME: Owns the resolver registry and I/O worker, drives the startup bulk load and the shutdown flush.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use strongbox_core::{PersistableStore, ResolverRegistry, StoreCategory};

use crate::client::PersistenceClient;
use crate::config::StrongboxConfig;
use crate::engine::{EngineError, StoreEngine};
use crate::file_manager::StorePaths;
use crate::rate_limit::RateLimiter;
use crate::worker::{self, IoWorkerHandle};

/// Object-safe view of a client used by the coordinator.
#[async_trait]
trait ClientLifecycle: Send + Sync {
    async fn load(&self) -> Result<bool, EngineError>;
    async fn shutdown(&self) -> bool;
}

#[async_trait]
impl<C: PersistenceClient> ClientLifecycle for C {
    async fn load(&self) -> Result<bool, EngineError> {
        self.read_persisted().await
    }

    async fn shutdown(&self) -> bool {
        self.flush_on_shutdown().await
    }
}

struct RegisteredClient {
    label: String,
    client: Weak<dyn ClientLifecycle>,
}

#[derive(Default)]
struct Registrations {
    clients: Vec<RegisteredClient>,
    primaries: HashSet<PathBuf>,
}

/// Result of the startup bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Clients whose persisted snapshot was applied.
    pub restored: usize,
    /// Clients with nothing on disk, left at their defaults.
    pub empty: usize,
    pub failed: usize,
}

impl LoadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Coordinates persistence for every domain module in the process.
pub struct PersistenceService {
    config: StrongboxConfig,
    registry: Arc<ResolverRegistry>,
    worker: IoWorkerHandle,
    registrations: Mutex<Registrations>,
}

impl PersistenceService {
    /// Create the service and spawn its I/O worker.
    pub fn new(config: StrongboxConfig) -> io::Result<Self> {
        Ok(Self {
            config,
            registry: Arc::new(ResolverRegistry::new()),
            worker: worker::spawn()?,
            registrations: Mutex::new(Registrations::default()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    pub fn config(&self) -> &StrongboxConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ResolverRegistry> {
        &self.registry
    }

    /// A rate limiter with the configured minimum write interval.
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.config.min_write_interval)
    }

    /// Register `client` and its store's resolver, and bind an engine to
    /// `<base>/db/<category>/<file_name>`.
    ///
    /// Call once per client while constructing it (typically inside
    /// `Arc::new_cyclic`), before [`PersistenceService::read_all_persisted`].
    pub fn get_or_create_persistence<C: PersistenceClient>(
        &self,
        client: &Weak<C>,
        category: StoreCategory,
        file_name: &str,
    ) -> StoreEngine<C::Store> {
        self.registry.register::<C::Store>();

        let paths = StorePaths::new(&self.config.base_dir, category, file_name);
        let label = format!(
            "{} ({})",
            <C::Store as PersistableStore>::TYPE_TAG,
            paths.primary.display()
        );

        {
            let mut registrations = self
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !registrations.primaries.insert(paths.primary.clone()) {
                tracing::warn!(
                    path = %paths.primary.display(),
                    "a store engine is already bound to this path"
                );
            }
            let lifecycle: Weak<dyn ClientLifecycle> = client.clone();
            registrations.clients.push(RegisteredClient {
                label,
                client: lifecycle,
            });
        }

        tracing::debug!(
            type_tag = <C::Store as PersistableStore>::TYPE_TAG,
            category = %category,
            file_name,
            "persistence bound"
        );

        StoreEngine::new(
            paths,
            self.config.sync_writes,
            Arc::clone(&self.registry),
            self.worker.clone(),
        )
    }

    /// [`PersistenceService::get_or_create_persistence`] in the private
    /// category, named after the store's type tag.
    pub fn get_or_create_default_persistence<C: PersistenceClient>(
        &self,
        client: &Weak<C>,
    ) -> StoreEngine<C::Store> {
        let file_name = <C::Store as PersistableStore>::default_file_name();
        self.get_or_create_persistence(client, StoreCategory::Private, &file_name)
    }

    pub fn client_count(&self) -> usize {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clients
            .len()
    }

    fn live_clients(&self) -> Vec<(String, Arc<dyn ClientLifecycle>)> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clients
            .iter()
            .filter_map(|entry| {
                let client = entry.client.upgrade();
                if client.is_none() {
                    tracing::debug!(client = %entry.label, "skipping dropped client");
                }
                client.map(|c| (entry.label.clone(), c))
            })
            .collect()
    }

    /// Load every registered client concurrently and wait for all of them.
    /// A failing client is logged and counted; the others still load.
    pub async fn read_all_persisted(&self) -> LoadSummary {
        let clients = self.live_clients();
        let results = join_all(
            clients
                .iter()
                .map(|(label, client)| async move { (label, client.load().await) }),
        )
        .await;

        let mut summary = LoadSummary::default();
        for (label, result) in results {
            match result {
                Ok(true) => summary.restored += 1,
                Ok(false) => summary.empty += 1,
                Err(e) => {
                    tracing::error!(client = %label, error = %e, "failed to read persisted store");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            restored = summary.restored,
            empty = summary.empty,
            failed = summary.failed,
            "read all persisted stores"
        );
        summary
    }

    /// Application-owned shutdown sequence: flush every rate-limited client
    /// that dropped a write, one after another, then wait until the I/O
    /// worker has run everything queued so far. Returns `false` if any final
    /// write failed or the queue could not be drained.
    pub async fn shutdown(&self) -> bool {
        let mut all_flushed = true;
        for (label, client) in self.live_clients() {
            if !client.shutdown().await {
                tracing::error!(client = %label, "final flush failed");
                all_flushed = false;
            }
        }

        // FIFO: once this no-op replies, every earlier job has run
        match self.worker.submit(|| ()) {
            Ok(barrier) => {
                if barrier.await.is_err() {
                    tracing::error!("io worker dropped the drain barrier");
                    all_flushed = false;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "could not drain io worker");
                all_flushed = false;
            }
        }

        tracing::info!(all_flushed, "persistence shut down");
        all_flushed
    }
}

impl std::fmt::Debug for PersistenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceService")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("clients", &self.client_count())
            .finish()
    }
}
