// ABOUTME: Persistence engine for strongbox, giving domain modules crash-safe single-blob durability.
// ABOUTME: Provides the file manager, shared I/O worker, store engine, coordinator and client contracts.

pub mod client;
pub mod config;
pub mod engine;
pub mod file_manager;
pub mod layout;
pub mod rate_limit;
pub mod service;
pub mod worker;

pub use client::{PersistOutcome, PersistenceClient};
pub use config::{ConfigError, StrongboxConfig};
pub use engine::{EngineError, StoreEngine};
pub use file_manager::{FileManagerError, StoreFileManager, StorePaths};
pub use layout::{CategoryLayout, LayoutSummary, scan_layout};
pub use rate_limit::{RateLimiter, WritePermit, WriteState};
pub use service::{LoadSummary, PersistenceService};
pub use worker::{IoWorkerHandle, WorkerStopped};
