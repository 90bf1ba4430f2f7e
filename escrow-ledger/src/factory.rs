//! Escrow factory - provisions pre-funded escrows
//!
//! The factory pulls the payment from the employer's allowance straight into
//! the new escrow's address, so an escrow never exists unfunded. It also owns
//! the oracle registry that turns oracle type names into oracle objects.

use crate::contract::{EscrowContract, EscrowParams};
use crate::events::{LedgerEvent, LogEntry};
use crate::oracle::{Oracle, OracleInstance, OracleKind};
use crate::token::TokenLedger;
use crate::types::{Address, Amount, JobId};
use crate::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terms of one escrow to deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Account paid on approval
    pub worker: Address,
    /// Mediator known up front, if any
    pub mediator: Option<Address>,
    /// Payment pulled from the employer into the escrow
    pub amount: Amount,
    /// Off-ledger job posting id
    pub job_id: JobId,
    /// Registered oracle kinds that gate payment
    pub oracle_kinds: Vec<OracleKind>,
}

/// Terms of N escrows as parallel arrays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDeployRequest {
    /// Worker of each escrow
    pub workers: Vec<Address>,
    /// Mediator of each escrow
    pub mediators: Vec<Option<Address>>,
    /// Payment of each escrow
    pub amounts: Vec<Amount>,
    /// Job posting id of each escrow
    pub job_ids: Vec<JobId>,
    /// Oracle kinds of each escrow
    pub oracle_kinds: Vec<Vec<OracleKind>>,
}

impl BatchDeployRequest {
    /// Zip the parallel arrays, failing if their lengths differ
    pub fn into_requests(self) -> LedgerResult<Vec<DeployRequest>> {
        let n = self.workers.len();
        if n == 0 {
            return Err(LedgerError::precondition("Batch must contain at least one escrow"));
        }
        if self.mediators.len() != n
            || self.amounts.len() != n
            || self.job_ids.len() != n
            || self.oracle_kinds.len() != n
        {
            return Err(LedgerError::precondition("Batch array lengths do not match"));
        }

        Ok(self
            .workers
            .into_iter()
            .zip(self.mediators)
            .zip(self.amounts)
            .zip(self.job_ids)
            .zip(self.oracle_kinds)
            .map(
                |((((worker, mediator), amount), job_id), oracle_kinds)| DeployRequest {
                    worker,
                    mediator,
                    amount,
                    job_id,
                    oracle_kinds,
                },
            )
            .collect())
    }
}

impl FromIterator<DeployRequest> for BatchDeployRequest {
    fn from_iter<I: IntoIterator<Item = DeployRequest>>(iter: I) -> Self {
        let mut batch = Self::default();
        for request in iter {
            batch.workers.push(request.worker);
            batch.mediators.push(request.mediator);
            batch.amounts.push(request.amount);
            batch.job_ids.push(request.job_id);
            batch.oracle_kinds.push(request.oracle_kinds);
        }
        batch
    }
}

/// Read-only factory view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorySummary {
    /// Factory address
    pub address: Address,
    /// Current admin
    pub admin: Address,
    /// Asset every escrow is funded in
    pub asset: Address,
    /// Escrows deployed so far
    pub total_contracts: usize,
    /// Address the next escrow will occupy
    pub next_contract_address: Address,
    /// Oracle registry by kind
    pub registered_oracles: BTreeMap<OracleKind, Address>,
}

/// Everything a call into the factory may touch besides the factory itself
pub struct FactoryEnv<'a> {
    pub caller: Address,
    pub token: &'a mut TokenLedger,
    pub oracles: &'a BTreeMap<Address, OracleInstance>,
    pub escrows: &'a mut BTreeMap<Address, EscrowContract>,
    pub logs: &'a mut Vec<LogEntry>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EscrowFactory {
    address: Address,
    admin: Address,
    asset: Address,
    oracle_registry: BTreeMap<OracleKind, Address>,
    contracts_by_employer: BTreeMap<Address, Vec<Address>>,
    all_contracts: Vec<Address>,
}

impl EscrowFactory {
    pub fn new(address: Address, admin: Address, asset: Address) -> LedgerResult<Self> {
        if admin.is_zero() {
            return Err(LedgerError::precondition("Admin cannot be the zero address"));
        }
        Ok(Self {
            address,
            admin,
            asset,
            oracle_registry: BTreeMap::new(),
            contracts_by_employer: BTreeMap::new(),
            all_contracts: Vec::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn asset(&self) -> Address {
        self.asset
    }

    pub fn oracle_for(&self, kind: OracleKind) -> Option<Address> {
        self.oracle_registry.get(&kind).copied()
    }

    pub fn contracts_by_employer(&self, employer: &Address) -> &[Address] {
        self.contracts_by_employer
            .get(employer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contract_count(&self, employer: &Address) -> usize {
        self.contracts_by_employer(employer).len()
    }

    pub fn total_count(&self) -> usize {
        self.all_contracts.len()
    }

    pub fn contract_at(&self, index: usize) -> Option<Address> {
        self.all_contracts.get(index).copied()
    }

    /// Address the next deployed escrow will occupy
    pub fn next_contract_address(&self) -> Address {
        Address::derive(&self.address, self.all_contracts.len() as u64)
    }

    pub fn summary(&self) -> FactorySummary {
        FactorySummary {
            address: self.address,
            admin: self.admin,
            asset: self.asset,
            total_contracts: self.all_contracts.len(),
            next_contract_address: self.next_contract_address(),
            registered_oracles: self.oracle_registry.clone(),
        }
    }

    fn require_admin(&self, caller: &Address) -> LedgerResult<()> {
        if *caller != self.admin {
            return Err(LedgerError::permission_denied("Only admin"));
        }
        Ok(())
    }

    pub fn register_oracle(&mut self, env: &mut FactoryEnv<'_>, oracle: Address) -> LedgerResult<()> {
        self.require_admin(&env.caller)?;
        let kind = env
            .oracles
            .get(&oracle)
            .map(|instance| instance.kind())
            .ok_or_else(|| LedgerError::precondition(format!("{} is not an oracle", oracle)))?;
        if self.oracle_registry.contains_key(&kind) {
            return Err(LedgerError::precondition(format!(
                "Oracle type already registered: {}",
                kind
            )));
        }

        self.oracle_registry.insert(kind, oracle);
        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::OracleRegistered { kind, oracle },
        ));
        Ok(())
    }

    /// Unregister `kind`; a kind that is not registered is left alone
    pub fn remove_oracle(&mut self, env: &mut FactoryEnv<'_>, kind: OracleKind) -> LedgerResult<()> {
        self.require_admin(&env.caller)?;
        if let Some(oracle) = self.oracle_registry.remove(&kind) {
            env.logs.push(LogEntry::new(
                self.address,
                LedgerEvent::OracleRemoved { kind, oracle },
            ));
        }
        Ok(())
    }

    pub fn transfer_admin(&mut self, env: &mut FactoryEnv<'_>, new_admin: Address) -> LedgerResult<()> {
        self.require_admin(&env.caller)?;
        if new_admin.is_zero() {
            return Err(LedgerError::precondition("Admin cannot be the zero address"));
        }
        let previous = std::mem::replace(&mut self.admin, new_admin);
        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::AdminTransferred {
                previous,
                new_admin,
            },
        ));
        Ok(())
    }

    fn resolve_oracles(&self, kinds: &[OracleKind]) -> LedgerResult<Vec<Address>> {
        kinds
            .iter()
            .map(|kind| {
                self.oracle_for(*kind).ok_or_else(|| {
                    LedgerError::precondition(format!("Unregistered oracle type: {}", kind))
                })
            })
            .collect()
    }

    /// Deploy one escrow funded from the caller's allowance to this factory
    pub fn deploy_contract(
        &mut self,
        env: &mut FactoryEnv<'_>,
        request: DeployRequest,
    ) -> LedgerResult<Address> {
        let oracles = self.resolve_oracles(&request.oracle_kinds)?;
        let escrow_address = self.next_contract_address();
        let employer = env.caller;

        let escrow = EscrowContract::new(EscrowParams {
            address: escrow_address,
            employer,
            worker: request.worker,
            mediator: request.mediator,
            asset: self.asset,
            payment_amount: request.amount,
            job_id: request.job_id.clone(),
            admin: self.admin,
            oracles,
            created_at: env.now,
        })?;

        env.token
            .transfer_from(self.address, employer, escrow_address, request.amount, env.logs)?;
        escrow.ensure_funded(env.token)?;

        env.escrows.insert(escrow_address, escrow);
        self.contracts_by_employer
            .entry(employer)
            .or_default()
            .push(escrow_address);
        self.all_contracts.push(escrow_address);

        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::ContractDeployed {
                escrow: escrow_address,
                employer,
                worker: request.worker,
                amount: request.amount,
                job_id: request.job_id,
            },
        ));
        Ok(escrow_address)
    }

    /// Deploy N escrows behind one allowance of their total, all or nothing
    pub fn deploy_batch(
        &mut self,
        env: &mut FactoryEnv<'_>,
        batch: BatchDeployRequest,
    ) -> LedgerResult<Vec<Address>> {
        let requests = batch.into_requests()?;
        let total = requests.iter().try_fold(0 as Amount, |acc, r| {
            acc.checked_add(r.amount)
                .ok_or_else(|| LedgerError::precondition("Batch total overflow"))
        })?;

        let allowed = env.token.allowance(&env.caller, &self.address);
        if allowed < total {
            return Err(LedgerError::precondition(format!(
                "Insufficient allowance for batch: {} approved, {} required",
                allowed, total
            )));
        }
        let balance = env.token.balance_of(&env.caller);
        if balance < total {
            return Err(LedgerError::precondition(format!(
                "Insufficient balance for batch: {} available, {} required",
                balance, total
            )));
        }

        let mut escrows = Vec::with_capacity(requests.len());
        for request in requests {
            escrows.push(self.deploy_contract(env, request)?);
        }

        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::BatchDeployed {
                employer: env.caller,
                escrows: escrows.clone(),
                total,
            },
        ));
        Ok(escrows)
    }
}
