//! Error types for escrow orchestration
//!
//! Failures originate in three places: the ledger client, the signer and the
//! orchestrator itself. They are collected in [`OrchestratorError`] and leave
//! the crate only through [`normalize_error`], which turns any of them into an
//! [`OperationFailure`] carrying one short sentence.

use escrow_ledger::{LedgerError, RevertKind, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error returned by a ledger client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The ledger rejected the operation while simulating it
    #[error("{reason}")]
    Reverted { kind: RevertKind, reason: String },

    /// The node refused the request
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node could not be reached
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<LedgerError> for ClientError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Revert { kind, reason } => Self::Reverted { kind, reason },
            other => Self::Rpc {
                code: other.rpc_code(),
                message: other.to_string(),
            },
        }
    }
}

/// Error returned by a signer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The key holder declined to sign
    #[error("Signature rejected: {0}")]
    Rejected(String),

    /// The signer could not produce a signature
    #[error("Signer unavailable: {0}")]
    Unavailable(String),
}

/// Internal error type for orchestration
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    /// No signature arrived within the configured window
    #[error("Timed out after {0}s waiting for a signature")]
    SignatureTimeout(u64),

    /// Cancelled before submission
    #[error("Operation cancelled")]
    Cancelled,

    /// Submitted and included, but the ledger reverted it
    #[error("Transaction {transaction_id} reverted: {reason}")]
    Reverted {
        transaction_id: TxHash,
        kind: RevertKind,
        reason: String,
    },

    /// Request rejected before anything was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Receipt does not contain what the operation should have produced
    #[error("Unexpected receipt for {transaction_id}: {message}")]
    UnexpectedReceipt {
        transaction_id: TxHash,
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

/// Failure taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    PermissionDenied,
    InvalidStateTransition,
    PreconditionFailed,
    SignatureRejected,
    NetworkOrInfrastructureFailure,
    /// Failed on the ledger after submission
    Reverted,
}

impl From<RevertKind> for FailureKind {
    fn from(kind: RevertKind) -> Self {
        match kind {
            RevertKind::PermissionDenied => Self::PermissionDenied,
            RevertKind::InvalidStateTransition => Self::InvalidStateTransition,
            RevertKind::PreconditionFailed => Self::PreconditionFailed,
        }
    }
}

/// Normalized failure returned by every orchestrator operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    /// Failure class
    pub kind: FailureKind,
    /// One short sentence for the user
    pub message: String,
    /// Transaction that reverted, when one was submitted
    pub transaction_id: Option<TxHash>,
}

impl OperationFailure {
    pub fn new<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
            transaction_id: None,
        }
    }

    pub fn with_transaction(mut self, transaction_id: TxHash) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transaction_id {
            Some(tx) => write!(f, "{} (transaction {})", self.message, tx),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for OperationFailure {}

const SIGNATURE_REJECTED: &str = "Transaction was rejected in your wallet.";

/// A known failure signature: node error codes and text fragments
struct FailureSignature {
    codes: &'static [i64],
    patterns: &'static [&'static str],
    kind: FailureKind,
    sentence: &'static str,
}

/// Known failure signatures in errors this crate does not produce.
/// Text patterns are matched against the lowercased text, first row wins.
const FAILURE_TABLE: &[FailureSignature] = &[
    FailureSignature {
        codes: &[4001],
        patterns: &["user rejected", "user denied", "rejected the request"],
        kind: FailureKind::SignatureRejected,
        sentence: SIGNATURE_REJECTED,
    },
    FailureSignature {
        codes: &[],
        patterns: &["insufficient funds"],
        kind: FailureKind::PreconditionFailed,
        sentence: "Insufficient funds to cover this transaction.",
    },
    FailureSignature {
        codes: &[],
        patterns: &["cannot estimate gas", "gas required exceeds", "execution reverted"],
        kind: FailureKind::PreconditionFailed,
        sentence: "The transaction would fail; check the contract state and your role.",
    },
    FailureSignature {
        codes: &[],
        patterns: &["nonce too low", "nonce too high", "invalid nonce"],
        kind: FailureKind::NetworkOrInfrastructureFailure,
        sentence: "Account nonce is out of sync; refresh and try again.",
    },
    FailureSignature {
        codes: &[],
        patterns: &["wrong chain", "chain id", "chainid"],
        kind: FailureKind::NetworkOrInfrastructureFailure,
        sentence: "Connected to the wrong network.",
    },
    FailureSignature {
        codes: &[-32005, 429],
        patterns: &["rate limit", "too many requests"],
        kind: FailureKind::NetworkOrInfrastructureFailure,
        sentence: "The network is busy; wait a moment and try again.",
    },
    FailureSignature {
        codes: &[],
        patterns: &["timeout", "timed out"],
        kind: FailureKind::NetworkOrInfrastructureFailure,
        sentence: "The network did not respond in time; try again.",
    },
    FailureSignature {
        codes: &[-32603],
        patterns: &["internal json-rpc error", "internal error"],
        kind: FailureKind::NetworkOrInfrastructureFailure,
        sentence: "The network node reported an internal error; try again.",
    },
];

fn lookup(code: Option<i64>, text: &str) -> Option<&'static FailureSignature> {
    let lowered = text.to_lowercase();
    FAILURE_TABLE.iter().find(|signature| {
        code.is_some_and(|code| signature.codes.contains(&code))
            || signature.patterns.iter().any(|p| lowered.contains(p))
    })
}

/// Look up a known failure signature in foreign failure text
pub fn translate_failure_text(text: &str) -> Option<(FailureKind, &'static str)> {
    lookup(None, text).map(|signature| (signature.kind, signature.sentence))
}

/// Translate foreign failure text, passing unknown text through verbatim
pub fn explain(text: &str, fallback: FailureKind) -> OperationFailure {
    explain_coded(None, text, fallback)
}

fn explain_coded(code: Option<i64>, text: &str, fallback: FailureKind) -> OperationFailure {
    match lookup(code, text) {
        Some(signature) => OperationFailure::new(signature.kind, signature.sentence),
        None => OperationFailure::new(fallback, text),
    }
}

/// Map any orchestration error to the failure surfaced to callers. Total.
pub fn normalize_error(err: &OrchestratorError) -> OperationFailure {
    match err {
        OrchestratorError::Client(ClientError::Reverted { kind, reason }) => {
            OperationFailure::new((*kind).into(), reason.clone())
        }
        OrchestratorError::Client(ClientError::Rpc { code, message }) => explain_coded(
            Some(*code),
            message,
            FailureKind::NetworkOrInfrastructureFailure,
        ),
        OrchestratorError::Client(ClientError::Transport(message)) => {
            explain(message, FailureKind::NetworkOrInfrastructureFailure)
        }
        OrchestratorError::Signer(SignerError::Rejected(_)) => {
            OperationFailure::new(FailureKind::SignatureRejected, SIGNATURE_REJECTED)
        }
        OrchestratorError::Signer(SignerError::Unavailable(message)) => {
            explain(message, FailureKind::NetworkOrInfrastructureFailure)
        }
        OrchestratorError::SignatureTimeout(secs) => OperationFailure::new(
            FailureKind::NetworkOrInfrastructureFailure,
            format!("No signature received within {}s.", secs),
        ),
        OrchestratorError::Cancelled => OperationFailure::new(
            FailureKind::SignatureRejected,
            "Operation was cancelled before submission.",
        ),
        OrchestratorError::Reverted {
            transaction_id,
            reason,
            ..
        } => OperationFailure::new(FailureKind::Reverted, reason.clone())
            .with_transaction(*transaction_id),
        OrchestratorError::InvalidRequest(message) => {
            OperationFailure::new(FailureKind::PreconditionFailed, message.clone())
        }
        OrchestratorError::UnexpectedReceipt {
            transaction_id,
            message,
        } => OperationFailure::new(FailureKind::NetworkOrInfrastructureFailure, message.clone())
            .with_transaction(*transaction_id),
        OrchestratorError::Config(message) => {
            OperationFailure::new(FailureKind::NetworkOrInfrastructureFailure, message.clone())
        }
    }
}

impl From<OrchestratorError> for OperationFailure {
    fn from(err: OrchestratorError) -> Self {
        normalize_error(&err)
    }
}
