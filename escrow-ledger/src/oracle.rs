//! Attestation oracles
//!
//! An oracle attests that the work behind an escrow is done. Escrows only see
//! the two-method [`Oracle`] surface; who may call `verify` is decided by each
//! oracle kind.

use crate::types::Address;
use crate::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of oracle kinds a factory can register
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OracleKind {
    /// Employer of the target escrow approves by hand
    Manual,
    /// Fixed attestor set, verified once a threshold of them agree
    Quorum,
}

impl OracleKind {
    /// Registry type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Quorum => "quorum",
        }
    }
}

impl fmt::Display for OracleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown oracle type: {0}")]
pub struct ParseOracleKindError(pub String);

impl FromStr for OracleKind {
    type Err = ParseOracleKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "quorum" => Ok(Self::Quorum),
            _ => Err(ParseOracleKindError(s.to_string())),
        }
    }
}

/// Context of a `verify` call
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub caller: Address,
    pub target: Address,
    /// Employer of `target` when it is an escrow
    pub target_employer: Option<Address>,
}

/// Capability surface every oracle exposes to escrows
pub trait Oracle {
    fn kind(&self) -> OracleKind;

    /// Record an attestation for `request.target`. Repeating it is harmless.
    fn verify(&mut self, request: &VerifyRequest) -> LedgerResult<()>;

    fn is_work_verified(&self, target: &Address) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct ManualOracle {
    verified: BTreeSet<Address>,
}

impl ManualOracle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Oracle for ManualOracle {
    fn kind(&self) -> OracleKind {
        OracleKind::Manual
    }

    fn verify(&mut self, request: &VerifyRequest) -> LedgerResult<()> {
        match request.target_employer {
            Some(employer) if employer == request.caller => {
                self.verified.insert(request.target);
                Ok(())
            }
            Some(_) => Err(LedgerError::permission_denied(
                "Only the escrow employer can verify work",
            )),
            None => Err(LedgerError::precondition("Verification target is not an escrow")),
        }
    }

    fn is_work_verified(&self, target: &Address) -> bool {
        self.verified.contains(target)
    }
}

#[derive(Debug, Clone)]
pub struct QuorumOracle {
    attestors: BTreeSet<Address>,
    threshold: usize,
    attestations: BTreeMap<Address, BTreeSet<Address>>,
}

impl QuorumOracle {
    pub fn new(attestors: impl IntoIterator<Item = Address>, threshold: usize) -> LedgerResult<Self> {
        let attestors: BTreeSet<Address> = attestors.into_iter().collect();
        if attestors.iter().any(Address::is_zero) {
            return Err(LedgerError::precondition("Attestor cannot be the zero address"));
        }
        if threshold == 0 || threshold > attestors.len() {
            return Err(LedgerError::precondition(format!(
                "Quorum threshold {} must be between 1 and {}",
                threshold,
                attestors.len()
            )));
        }
        Ok(Self {
            attestors,
            threshold,
            attestations: BTreeMap::new(),
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn attestation_count(&self, target: &Address) -> usize {
        self.attestations.get(target).map_or(0, BTreeSet::len)
    }
}

impl Oracle for QuorumOracle {
    fn kind(&self) -> OracleKind {
        OracleKind::Quorum
    }

    fn verify(&mut self, request: &VerifyRequest) -> LedgerResult<()> {
        if !self.attestors.contains(&request.caller) {
            return Err(LedgerError::permission_denied("Caller is not an attestor"));
        }
        self.attestations
            .entry(request.target)
            .or_default()
            .insert(request.caller);
        Ok(())
    }

    fn is_work_verified(&self, target: &Address) -> bool {
        self.attestation_count(target) >= self.threshold
    }
}

/// An oracle living on the ledger
#[derive(Debug, Clone)]
pub enum OracleInstance {
    Manual(ManualOracle),
    Quorum(QuorumOracle),
}

impl Oracle for OracleInstance {
    fn kind(&self) -> OracleKind {
        match self {
            Self::Manual(oracle) => oracle.kind(),
            Self::Quorum(oracle) => oracle.kind(),
        }
    }

    fn verify(&mut self, request: &VerifyRequest) -> LedgerResult<()> {
        match self {
            Self::Manual(oracle) => oracle.verify(request),
            Self::Quorum(oracle) => oracle.verify(request),
        }
    }

    fn is_work_verified(&self, target: &Address) -> bool {
        match self {
            Self::Manual(oracle) => oracle.is_work_verified(target),
            Self::Quorum(oracle) => oracle.is_work_verified(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RevertKind;

    fn addr(n: u64) -> Address {
        Address::derive(&Address::ZERO, n)
    }

    #[test]
    fn test_manual_oracle_only_employer_verifies() {
        let mut oracle = ManualOracle::new();
        let escrow = addr(10);

        let err = oracle
            .verify(&VerifyRequest {
                caller: addr(2),
                target: escrow,
                target_employer: Some(addr(1)),
            })
            .unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PermissionDenied));
        assert!(!oracle.is_work_verified(&escrow));

        let request = VerifyRequest {
            caller: addr(1),
            target: escrow,
            target_employer: Some(addr(1)),
        };
        oracle.verify(&request).unwrap();
        oracle.verify(&request).unwrap();
        assert!(oracle.is_work_verified(&escrow));
        assert!(!oracle.is_work_verified(&addr(11)));
    }

    #[test]
    fn test_quorum_needs_threshold_distinct_attestors() {
        let mut oracle = QuorumOracle::new([addr(1), addr(2), addr(3)], 2).unwrap();
        let target = addr(10);
        let by = |caller| VerifyRequest {
            caller,
            target,
            target_employer: None,
        };

        oracle.verify(&by(addr(1))).unwrap();
        oracle.verify(&by(addr(1))).unwrap();
        assert!(!oracle.is_work_verified(&target));

        oracle.verify(&by(addr(3))).unwrap();
        assert!(oracle.is_work_verified(&target));

        assert!(oracle.verify(&by(addr(9))).is_err());
    }

    #[test]
    fn test_quorum_threshold_bounds() {
        assert!(QuorumOracle::new([addr(1)], 0).is_err());
        assert!(QuorumOracle::new([addr(1)], 2).is_err());
        assert!(QuorumOracle::new([addr(1), addr(1)], 2).is_err());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!("Manual".parse::<OracleKind>().unwrap(), OracleKind::Manual);
        assert_eq!(" quorum ".parse::<OracleKind>().unwrap(), OracleKind::Quorum);
        assert!("chainlink".parse::<OracleKind>().is_err());
        assert_eq!(OracleKind::Manual.to_string(), "manual");
    }
}
