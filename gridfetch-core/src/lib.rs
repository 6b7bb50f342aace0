//! Download engine for a federated scientific data archive catalog: the
//! orchestrator loop, per-host work queues and concurrency accounting, the
//! per-transfer worker state machine, the single-writer disk serializer, and
//! event-driven persistence of transfer state back to the catalog.
//!
//! Everything outside this crate — metadata ingestion, identity-provider
//! logon, catalog schema bootstrap, and the command-line entry point — is an
//! external collaborator this crate only consumes through narrow interfaces
//! (`CredentialProvider`, the `transfert`/`model` tables, `EngineConfig`).

pub mod catalog;
pub mod checksum;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod host_pool;
pub mod orchestrator;
pub mod speed;
pub mod transfer;
pub mod worker;
pub mod write_serializer;

pub use config::EngineConfig;
pub use credentials::{CredentialProvider, FileCredentialProvider};
pub use error::{FetchError, Result};
pub use orchestrator::{Orchestrator, OrchestratorControl};
pub use transfer::{TransferId, TransferRow, TransferStatus};
