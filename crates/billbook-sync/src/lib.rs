//! # billbook-sync: Offline-First Payment Engine
//!
//! Records invoice payments against a local SQLite store and mirrors them to
//! a remote store whenever one is reachable. Nothing a user records is lost
//! while offline, nothing is shown twice, and no invoice is over-paid.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Payment Engine Architecture                      │
//! │                                                                         │
//! │   UI / daemon                                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      PaymentEngine (facade)                      │  │
//! │  │  record_payment · delete_payment · list_payments_for_invoice     │  │
//! │  │  drain · reconcile_invoice · pending_sync_count                  │  │
//! │  └───────┬──────────────────┬──────────────────┬────────────────────┘  │
//! │          ▼                  ▼                  ▼                        │
//! │  ┌────────────────┐ ┌────────────────┐ ┌────────────────────────┐      │
//! │  │ PaymentRecorder│ │   Reconciler   │ │   PaymentResolver      │      │
//! │  │ PaymentReversal│ │ (overpayment   │ │ (remote ∪ local,       │      │
//! │  │                │ │  guard)        │ │  no duplicates)        │      │
//! │  └───────┬────────┘ └────────────────┘ └────────────────────────┘      │
//! │          ▼                                                              │
//! │  ┌────────────────┐     ┌────────────────┐     ┌──────────────────┐    │
//! │  │  RemoteMirror  │────►│  RemoteStore   │◄────│  QueueDrainer    │    │
//! │  │ call or queue  │     │ (HTTP / memory)│     │ replays sync_queue│   │
//! │  └───────┬────────┘     └────────────────┘     └────────▲─────────┘    │
//! │          ▼                                              │               │
//! │  ┌──────────────────────────────────────┐      ┌────────┴─────────┐    │
//! │  │ billbook-db (payments, invoices,     │      │    SyncAgent     │    │
//! │  │ sync_queue, ledger, accounts)        │      │ interval/backoff │    │
//! │  └──────────────────────────────────────┘      └────────▲─────────┘    │
//! │                                                         │               │
//! │                      ConnectivityOracle ◄── ConnectivityMonitor (ping) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `PaymentEngine` facade and builder
//! - [`reconciler`] - invoice aggregate recomputation and overpayment guard
//! - [`drain`] - sync queue replay
//! - [`agent`] - background `SyncAgent`
//! - [`connectivity`] - online/offline oracle and probe loop
//! - [`remote`] - `RemoteStore` trait, HTTP client, in-memory store
//! - [`accounts`] - cash/bank balance collaborator
//! - [`config`] - engine configuration (TOML + env)
//! - [`events`] - status and warning events
//! - [`error`] - engine, remote and config errors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billbook_sync::{EngineConfig, HttpRemoteStore, PaymentEngine, SyncAgent};
//! use billbook_db::{Database, DbConfig};
//!
//! let config = EngineConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//! let remote = Arc::new(HttpRemoteStore::from_config(&config)?);
//!
//! let engine = PaymentEngine::builder(db, remote).with_config(&config).build();
//! let outcome = engine.record_payment(input).await?;
//! println!("{:?}", outcome.disposition);
//!
//! let mut agent = SyncAgent::new(engine.clone(), &config);
//! let handle = agent.start().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod accounts;
pub mod agent;
pub mod config;
pub mod connectivity;
pub mod drain;
pub mod engine;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod remote;

mod mirror;
mod recorder;
mod resolver;
mod reversal;

// =============================================================================
// Re-exports
// =============================================================================

pub use accounts::{AccountBook, MemoryAccountBook};
pub use agent::{SyncAgent, SyncAgentBuilder, SyncAgentHandle};
pub use config::EngineConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivityMonitorHandle, ConnectivityOracle};
pub use drain::DrainReport;
pub use engine::{PaymentEngine, PaymentEngineBuilder};
pub use error::{ConfigError, EngineError, EngineResult, RemoteError, RemoteResult};
pub use events::{NoOpEmitter, SyncEventEmitter, SyncStatus, TracingEmitter};
pub use reconciler::{Reconciler, Reconciliation};
pub use recorder::RecordOutcome;
pub use remote::{FailureMode, HttpRemoteStore, MemoryRemoteStore, RemoteStore};
