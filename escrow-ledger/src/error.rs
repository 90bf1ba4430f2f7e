//! Error types for the escrow ledger
//!
//! Every check performed by a ledger object fails with a [`LedgerError::Revert`]
//! carrying a classification set where the check lives and a descriptive
//! reason that clients surface verbatim. The remaining variants describe
//! problems with the submitted operation itself and carry JSON-RPC style codes.

use crate::types::{Address, TxHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of an on-ledger revert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevertKind {
    /// Caller is not allowed to perform the operation
    PermissionDenied,
    /// Object is not in a state that allows the operation
    InvalidStateTransition,
    /// Arguments, funds, allowances or attestations are insufficient
    PreconditionFailed,
}

/// Main error type for ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A ledger object rejected the call
    #[error("{reason}")]
    Revert { kind: RevertKind, reason: String },

    /// Signature or public key could not be verified
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Operation nonce is behind the account nonce
    #[error("nonce too low: expected {expected}, got {got}")]
    NonceTooLow { expected: u64, got: u64 },

    /// Operation nonce is ahead of the account nonce
    #[error("nonce too high: expected {expected}, got {got}")]
    NonceTooHigh { expected: u64, got: u64 },

    /// Operation was signed for another ledger
    #[error("wrong chain id: expected {expected}, got {got}")]
    WrongChain { expected: u64, got: u64 },

    /// No object of the requested type lives at the address
    #[error("no such object at {0}")]
    UnknownObject(Address),

    /// No receipt is known for the transaction
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxHash),

    /// Canonical encoding failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    /// Create a permission revert
    pub fn permission_denied<S: Into<String>>(reason: S) -> Self {
        Self::Revert {
            kind: RevertKind::PermissionDenied,
            reason: reason.into(),
        }
    }

    /// Create a state transition revert
    pub fn invalid_state<S: Into<String>>(reason: S) -> Self {
        Self::Revert {
            kind: RevertKind::InvalidStateTransition,
            reason: reason.into(),
        }
    }

    /// Create a precondition revert
    pub fn precondition<S: Into<String>>(reason: S) -> Self {
        Self::Revert {
            kind: RevertKind::PreconditionFailed,
            reason: reason.into(),
        }
    }

    /// Revert classification, if this is a revert
    pub fn revert_kind(&self) -> Option<RevertKind> {
        match self {
            Self::Revert { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Turn any error raised while executing calls into a revert.
    ///
    /// Missing objects and encoding problems inside an operation revert it
    /// like any other failed check.
    pub fn into_revert(self) -> (RevertKind, String) {
        match self {
            Self::Revert { kind, reason } => (kind, reason),
            other => (RevertKind::PreconditionFailed, other.to_string()),
        }
    }

    /// JSON-RPC style error code
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Revert { .. } => 3,
            Self::InvalidSignature(_) => -32602,
            Self::NonceTooLow { .. } | Self::NonceTooHigh { .. } | Self::WrongChain { .. } => {
                -32000
            }
            Self::UnknownObject(_) => -32602,
            Self::UnknownTransaction(_) => -32001,
            Self::Serialization(_) => -32603,
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_helpers() {
        let err = LedgerError::permission_denied("Only employer can approve");
        assert_eq!(err.revert_kind(), Some(RevertKind::PermissionDenied));
        assert_eq!(err.to_string(), "Only employer can approve");
        assert_eq!(err.rpc_code(), 3);
    }

    #[test]
    fn test_non_revert_becomes_precondition() {
        let (kind, reason) = LedgerError::UnknownObject(Address::ZERO).into_revert();
        assert_eq!(kind, RevertKind::PreconditionFailed);
        assert!(reason.contains("no such object"));
    }
}
