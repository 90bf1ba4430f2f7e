//! Escrow ledger objects for job payments
//!
//! This crate implements the on-ledger side of the job escrow system:
//! - Fungible assets with balances and spend allowances
//! - Pluggable attestation oracles consulted before release
//! - Per-job escrow contracts enforcing the release/dispute/refund state machine
//! - A factory that provisions pre-funded escrows and keeps the oracle registry
//! - An append-only ledger that executes signed multi-call operations atomically

pub mod contract;
pub mod error;
pub mod events;
pub mod factory;
pub mod ledger;
pub mod operation;
pub mod oracle;
pub mod token;
pub mod types;

pub use contract::{EscrowContract, EscrowDetails, EscrowState};
pub use error::{LedgerError, RevertKind};
pub use events::{LedgerEvent, LogEntry, ObjectKind};
pub use factory::{BatchDeployRequest, DeployRequest, EscrowFactory, FactorySummary};
pub use ledger::{Ledger, Receipt, ReceiptStatus, SharedLedger};
pub use operation::{
    Call, CallData, Deployment, EscrowCall, FactoryCall, OracleCall, SignedOperation, TokenCall,
    UnsignedOperation,
};
pub use oracle::{Oracle, OracleInstance, OracleKind};
pub use types::{Address, Amount, JobId, TxHash};

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
