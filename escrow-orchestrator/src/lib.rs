//! Client-side orchestration for the job escrow system
//!
//! This crate turns business actions into signed ledger operations:
//! - Atomic compound operations (approve + deploy, verify + pay, approve + top up)
//! - A monotonic progress state machine reported to observers
//! - Bounded, cancellable signature acquisition
//! - Normalization of every failure into one short sentence
//! - The admin registry used for admin rotation and lost-admin recovery

pub mod admin;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod explorer;
pub mod mirror;
pub mod orchestrator;
pub mod signer;
pub mod status;

pub use admin::{AdminRegistry, FactoryConfig};
pub use cancel::{cancellation, CancelHandle, CancellationToken};
pub use client::{InProcessClient, LedgerClient};
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use error::{
    explain, normalize_error, ClientError, FailureKind, OperationFailure, OrchestratorError,
    SignerError,
};
pub use explorer::ExplorerLinks;
pub use mirror::{DeploymentRecord, HttpJobMirror, InMemoryMirror, JobMirror, MirrorError, PaymentKind, PaymentRecord};
pub use orchestrator::{
    ContractState, CreatedObject, DeployedBatch, DeployedEscrow, OperationContext,
    OperationOutcome, PermissionReport, TransactionOrchestrator,
};
pub use signer::{LocalSigner, Signer};
pub use status::{ChannelObserver, NoopObserver, OperationStep, StatusObserver, StatusUpdate};

/// Result type alias for orchestrated operations
pub type OperationResult<T> = Result<T, OperationFailure>;
