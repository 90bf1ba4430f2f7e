//! Ledger events
//!
//! Events are appended to the receipt of the operation that emitted them and
//! are discarded together with every other effect when the operation reverts.

use crate::oracle::OracleKind;
use crate::types::{Address, Amount, JobId};
use serde::{Deserialize, Serialize};

/// Kind of object created by a creation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    EscrowFactory,
    Oracle(OracleKind),
}

/// Event emitted by a ledger object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    // Asset
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    Approval {
        owner: Address,
        spender: Address,
        amount: Amount,
    },

    // Escrow
    WorkApproved {
        worker: Address,
        amount: Amount,
    },
    DisputeRaised {
        raised_by: Address,
        reason: String,
    },
    DisputeResolved {
        mediator: Address,
        worker_amount: Amount,
        employer_amount: Amount,
    },
    ContractCancelled {
        employer: Address,
        refund: Amount,
    },
    EscrowTopUp {
        from: Address,
        amount: Amount,
    },
    MediatorAssigned {
        mediator: Address,
    },

    // Oracle
    WorkVerified {
        target: Address,
        attestor: Address,
    },

    // Factory
    OracleRegistered {
        kind: OracleKind,
        oracle: Address,
    },
    OracleRemoved {
        kind: OracleKind,
        oracle: Address,
    },
    ContractDeployed {
        escrow: Address,
        employer: Address,
        worker: Address,
        amount: Amount,
        job_id: JobId,
    },
    BatchDeployed {
        employer: Address,
        escrows: Vec<Address>,
        total: Amount,
    },
    AdminTransferred {
        previous: Address,
        new_admin: Address,
    },

    // Creation
    ObjectCreated {
        address: Address,
        kind: ObjectKind,
    },
}

/// Event together with the object that emitted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub emitter: Address,
    pub event: LedgerEvent,
}

impl LogEntry {
    pub fn new(emitter: Address, event: LedgerEvent) -> Self {
        Self { emitter, event }
    }
}
