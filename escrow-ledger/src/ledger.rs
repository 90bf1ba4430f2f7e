//! Ledger - append-only, globally ordered execution of signed operations
//!
//! Every submitted operation becomes one block. Its calls run in order against
//! a copy of the world state; the copy replaces the live state only if every
//! call succeeds, so an operation lands entirely or not at all. The sender
//! nonce is consumed either way and a receipt is always recorded.

use crate::contract::{EscrowContract, EscrowDetails, EscrowEnv};
use crate::events::{LedgerEvent, LogEntry, ObjectKind};
use crate::factory::{EscrowFactory, FactoryEnv, FactorySummary};
use crate::operation::{
    Call, CallData, Deployment, EscrowCall, FactoryCall, OracleCall, SignedOperation, TokenCall,
    UnsignedOperation,
};
use crate::oracle::{ManualOracle, Oracle, OracleInstance, OracleKind, QuorumOracle, VerifyRequest};
use crate::token::TokenLedger;
use crate::types::{Address, Amount, TxHash};
use crate::{LedgerError, LedgerResult, RevertKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Ledger shared between concurrent clients
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Outcome recorded for a submitted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Success,
    Reverted { kind: RevertKind, reason: String },
}

/// Confirmation record of a submitted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Id of the operation
    pub transaction_id: TxHash,
    /// Block the operation was included in
    pub block_number: u64,
    /// Sender
    pub from: Address,
    /// Success or the revert that undid every call
    pub status: ReceiptStatus,
    /// Events emitted; empty when reverted
    pub logs: Vec<LogEntry>,
    /// Block time
    pub timestamp: DateTime<Utc>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ReceiptStatus::Success)
    }

    pub fn events(&self) -> impl Iterator<Item = &LedgerEvent> {
        self.logs.iter().map(|log| &log.event)
    }
}

#[derive(Debug, Clone, Default)]
struct WorldState {
    tokens: BTreeMap<Address, TokenLedger>,
    escrows: BTreeMap<Address, EscrowContract>,
    factories: BTreeMap<Address, EscrowFactory>,
    oracles: BTreeMap<Address, OracleInstance>,
    creation_nonces: BTreeMap<Address, u64>,
}

impl WorldState {
    fn next_created_address(&mut self, deployer: Address) -> Address {
        let nonce = self.creation_nonces.entry(deployer).or_insert(0);
        let address = Address::derive(&deployer, *nonce);
        *nonce += 1;
        address
    }

    fn apply_all(
        &mut self,
        caller: Address,
        calls: &[Call],
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<LogEntry>> {
        let mut logs = Vec::new();
        for (index, call) in calls.iter().enumerate() {
            self.apply(caller, call, now, &mut logs).map_err(|err| {
                debug!("Call {} ({}) to {} failed: {}", index, call.label(), call.target, err);
                err
            })?;
        }
        Ok(logs)
    }

    fn apply(
        &mut self,
        caller: Address,
        call: &Call,
        now: DateTime<Utc>,
        logs: &mut Vec<LogEntry>,
    ) -> LedgerResult<()> {
        if call.value != 0 {
            return Err(LedgerError::precondition(format!(
                "{} does not accept value",
                call.target
            )));
        }

        match &call.payload {
            CallData::Token(token_call) => {
                let token = self
                    .tokens
                    .get_mut(&call.target)
                    .ok_or(LedgerError::UnknownObject(call.target))?;
                match token_call {
                    TokenCall::Approve { spender, amount } => {
                        token.approve(caller, *spender, *amount, logs)
                    }
                    TokenCall::Transfer { to, amount } => token.transfer(caller, *to, *amount, logs),
                }
            }

            CallData::Escrow(escrow_call) => {
                let WorldState {
                    tokens,
                    escrows,
                    oracles,
                    ..
                } = self;
                let escrow = escrows
                    .get_mut(&call.target)
                    .ok_or(LedgerError::UnknownObject(call.target))?;
                let token = tokens
                    .get_mut(&escrow.asset())
                    .ok_or(LedgerError::UnknownObject(escrow.asset()))?;
                let mut env = EscrowEnv {
                    caller,
                    token,
                    oracles: &*oracles,
                    logs,
                };
                match escrow_call {
                    EscrowCall::ApproveAndPay => escrow.approve_and_pay(&mut env).map(|_| ()),
                    EscrowCall::RaiseDispute { reason } => escrow.raise_dispute(&mut env, reason),
                    EscrowCall::ResolveDispute { worker_percent } => {
                        escrow.resolve_dispute(&mut env, *worker_percent).map(|_| ())
                    }
                    EscrowCall::CancelContract => escrow.cancel_contract(&mut env).map(|_| ()),
                    EscrowCall::TopUp { amount } => escrow.top_up(&mut env, *amount),
                    EscrowCall::AssignMediator { mediator } => {
                        escrow.assign_mediator(&mut env, *mediator)
                    }
                }
            }

            CallData::Factory(factory_call) => {
                let WorldState {
                    tokens,
                    escrows,
                    factories,
                    oracles,
                    ..
                } = self;
                let factory = factories
                    .get_mut(&call.target)
                    .ok_or(LedgerError::UnknownObject(call.target))?;
                let token = tokens
                    .get_mut(&factory.asset())
                    .ok_or(LedgerError::UnknownObject(factory.asset()))?;
                let mut env = FactoryEnv {
                    caller,
                    token,
                    oracles: &*oracles,
                    escrows,
                    logs,
                    now,
                };
                match factory_call {
                    FactoryCall::RegisterOracle { oracle } => factory.register_oracle(&mut env, *oracle),
                    FactoryCall::RemoveOracle { kind } => factory.remove_oracle(&mut env, *kind),
                    FactoryCall::TransferAdmin { new_admin } => {
                        factory.transfer_admin(&mut env, *new_admin)
                    }
                    FactoryCall::DeployContract(request) => {
                        factory.deploy_contract(&mut env, request.clone()).map(|_| ())
                    }
                    FactoryCall::DeployBatch(batch) => {
                        factory.deploy_batch(&mut env, batch.clone()).map(|_| ())
                    }
                }
            }

            CallData::Oracle(OracleCall::Verify { target }) => {
                let target_employer = self.escrows.get(target).map(EscrowContract::employer);
                let oracle = self
                    .oracles
                    .get_mut(&call.target)
                    .ok_or(LedgerError::UnknownObject(call.target))?;
                oracle.verify(&VerifyRequest {
                    caller,
                    target: *target,
                    target_employer,
                })?;
                logs.push(LogEntry::new(
                    call.target,
                    LedgerEvent::WorkVerified {
                        target: *target,
                        attestor: caller,
                    },
                ));
                Ok(())
            }

            CallData::Create(deployment) => {
                if !call.target.is_zero() {
                    return Err(LedgerError::precondition(
                        "Creation calls must target the zero address",
                    ));
                }
                let address = self.next_created_address(caller);
                let kind = match deployment {
                    Deployment::EscrowFactory { admin, asset } => {
                        if !self.tokens.contains_key(asset) {
                            return Err(LedgerError::precondition(format!(
                                "{} is not an asset",
                                asset
                            )));
                        }
                        self.factories
                            .insert(address, EscrowFactory::new(address, *admin, *asset)?);
                        ObjectKind::EscrowFactory
                    }
                    Deployment::ManualOracle => {
                        self.oracles
                            .insert(address, OracleInstance::Manual(ManualOracle::new()));
                        ObjectKind::Oracle(OracleKind::Manual)
                    }
                    Deployment::QuorumOracle {
                        attestors,
                        threshold,
                    } => {
                        let oracle = QuorumOracle::new(attestors.iter().copied(), *threshold as usize)?;
                        self.oracles.insert(address, OracleInstance::Quorum(oracle));
                        ObjectKind::Oracle(OracleKind::Quorum)
                    }
                };
                logs.push(LogEntry::new(
                    Address::ZERO,
                    LedgerEvent::ObjectCreated { address, kind },
                ));
                Ok(())
            }
        }
    }
}

/// The in-process ledger
#[derive(Debug)]
pub struct Ledger {
    chain_id: u64,
    state: WorldState,
    account_nonces: BTreeMap<Address, u64>,
    receipts: HashMap<TxHash, Receipt>,
    block_number: u64,
}

impl Ledger {
    pub fn new(chain_id: u64) -> Self {
        info!("Initializing ledger (chain id {})", chain_id);
        Self {
            chain_id,
            state: WorldState::default(),
            account_nonces: BTreeMap::new(),
            receipts: HashMap::new(),
            block_number: 0,
        }
    }

    /// Wrap into a handle for concurrent clients
    pub fn shared(self) -> SharedLedger {
        Arc::new(RwLock::new(self))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Genesis: create a fungible asset
    pub fn create_asset(&mut self, symbol: &str) -> Address {
        let address = self.state.next_created_address(Address::ZERO);
        self.state
            .tokens
            .insert(address, TokenLedger::new(address, symbol));
        info!("Created asset {} at {}", symbol, address);
        address
    }

    /// Genesis: issue `amount` of `asset` to `to`
    pub fn mint(&mut self, asset: &Address, to: Address, amount: Amount) -> LedgerResult<()> {
        self.state
            .tokens
            .get_mut(asset)
            .ok_or(LedgerError::UnknownObject(*asset))?
            .mint(to, amount)
    }

    /// Next nonce expected from `account`
    pub fn nonce(&self, account: &Address) -> u64 {
        self.account_nonces.get(account).copied().unwrap_or(0)
    }

    /// Dry-run an operation without changing anything; returns the logs it would emit
    pub fn simulate(&self, operation: &UnsignedOperation) -> LedgerResult<Vec<LogEntry>> {
        self.check_chain(operation)?;
        let mut scratch = self.state.clone();
        scratch.apply_all(operation.from, &operation.calls, Utc::now())
    }

    /// Execute a signed operation as the next block.
    ///
    /// Errors are returned only for operations that cannot be included at all
    /// (bad signature, chain id or nonce). Reverts are recorded in the receipt.
    pub fn submit(&mut self, signed: SignedOperation) -> LedgerResult<TxHash> {
        signed.verify()?;
        let operation = &signed.operation;
        self.check_chain(operation)?;

        let expected = self.nonce(&operation.from);
        if operation.nonce < expected {
            return Err(LedgerError::NonceTooLow {
                expected,
                got: operation.nonce,
            });
        }
        if operation.nonce > expected {
            return Err(LedgerError::NonceTooHigh {
                expected,
                got: operation.nonce,
            });
        }

        let transaction_id = signed.transaction_id()?;
        self.account_nonces.insert(operation.from, expected + 1);
        self.block_number += 1;
        let timestamp = Utc::now();

        let mut scratch = self.state.clone();
        let (status, logs) = match scratch.apply_all(operation.from, &operation.calls, timestamp) {
            Ok(logs) => {
                self.state = scratch;
                info!(
                    "Block {}: {} from {} succeeded with {} call(s), {} event(s)",
                    self.block_number,
                    transaction_id,
                    operation.from,
                    operation.calls.len(),
                    logs.len()
                );
                (ReceiptStatus::Success, logs)
            }
            Err(err) => {
                let (kind, reason) = err.into_revert();
                warn!(
                    "Block {}: {} from {} reverted ({:?}): {}",
                    self.block_number, transaction_id, operation.from, kind, reason
                );
                (ReceiptStatus::Reverted { kind, reason }, Vec::new())
            }
        };

        self.receipts.insert(
            transaction_id,
            Receipt {
                transaction_id,
                block_number: self.block_number,
                from: operation.from,
                status,
                logs,
                timestamp,
            },
        );
        Ok(transaction_id)
    }

    pub fn receipt(&self, transaction_id: &TxHash) -> LedgerResult<&Receipt> {
        self.receipts
            .get(transaction_id)
            .ok_or(LedgerError::UnknownTransaction(*transaction_id))
    }

    fn check_chain(&self, operation: &UnsignedOperation) -> LedgerResult<()> {
        if operation.chain_id != self.chain_id {
            return Err(LedgerError::WrongChain {
                expected: self.chain_id,
                got: operation.chain_id,
            });
        }
        Ok(())
    }

    fn token(&self, asset: &Address) -> LedgerResult<&TokenLedger> {
        self.state
            .tokens
            .get(asset)
            .ok_or(LedgerError::UnknownObject(*asset))
    }

    pub fn escrow(&self, escrow: &Address) -> LedgerResult<&EscrowContract> {
        self.state
            .escrows
            .get(escrow)
            .ok_or(LedgerError::UnknownObject(*escrow))
    }

    pub fn factory(&self, factory: &Address) -> LedgerResult<&EscrowFactory> {
        self.state
            .factories
            .get(factory)
            .ok_or(LedgerError::UnknownObject(*factory))
    }

    pub fn oracle(&self, oracle: &Address) -> LedgerResult<&OracleInstance> {
        self.state
            .oracles
            .get(oracle)
            .ok_or(LedgerError::UnknownObject(*oracle))
    }

    pub fn escrow_details(&self, escrow: &Address) -> LedgerResult<EscrowDetails> {
        self.escrow(escrow).map(EscrowContract::details)
    }

    pub fn escrow_balance(&self, escrow: &Address) -> LedgerResult<Amount> {
        let escrow = self.escrow(escrow)?;
        Ok(escrow.balance(self.token(&escrow.asset())?))
    }

    pub fn check_oracles(&self, escrow: &Address) -> LedgerResult<bool> {
        Ok(self.escrow(escrow)?.check_oracles(&self.state.oracles))
    }

    pub fn is_work_verified(&self, oracle: &Address, target: &Address) -> LedgerResult<bool> {
        Ok(self.oracle(oracle)?.is_work_verified(target))
    }

    pub fn oracle_kind(&self, oracle: &Address) -> LedgerResult<OracleKind> {
        Ok(self.oracle(oracle)?.kind())
    }

    pub fn factory_summary(&self, factory: &Address) -> LedgerResult<FactorySummary> {
        self.factory(factory).map(EscrowFactory::summary)
    }

    pub fn asset_balance(&self, asset: &Address, owner: &Address) -> LedgerResult<Amount> {
        Ok(self.token(asset)?.balance_of(owner))
    }

    pub fn allowance(&self, asset: &Address, owner: &Address, spender: &Address) -> LedgerResult<Amount> {
        Ok(self.token(asset)?.allowance(owner, spender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::EscrowState;
    use crate::factory::DeployRequest;
    use crate::types::sha256_digest;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    const CHAIN_ID: u64 = 31337;

    struct Account {
        key: SecretKey,
        address: Address,
    }

    impl Account {
        fn new(seed: &str) -> Self {
            let key = SecretKey::from_slice(&sha256_digest(seed.as_bytes())).unwrap();
            let address =
                Address::from_public_key(&PublicKey::from_secret_key(&Secp256k1::new(), &key));
            Self { key, address }
        }
    }

    struct World {
        ledger: Ledger,
        asset: Address,
        admin: Account,
        employer: Account,
        worker: Account,
        factory: Address,
    }

    impl World {
        fn new() -> Self {
            let mut ledger = Ledger::new(CHAIN_ID);
            let asset = ledger.create_asset("USDC");
            let admin = Account::new("admin");
            let employer = Account::new("employer");
            let worker = Account::new("worker");
            ledger.mint(&asset, employer.address, 1_000).unwrap();

            let mut world = Self {
                ledger,
                asset,
                admin,
                employer,
                worker,
                factory: Address::ZERO,
            };
            let admin = world.admin.address;
            let receipt = world.send(
                "admin",
                vec![Call::create(Deployment::EscrowFactory { admin, asset })],
            );
            world.factory = created(&receipt);
            world
        }

        fn account(&self, who: &str) -> &Account {
            match who {
                "admin" => &self.admin,
                "employer" => &self.employer,
                _ => &self.worker,
            }
        }

        fn send(&mut self, who: &str, calls: Vec<Call>) -> Receipt {
            let account = self.account(who);
            let operation = UnsignedOperation {
                chain_id: CHAIN_ID,
                from: account.address,
                nonce: self.ledger.nonce(&account.address),
                calls,
            };
            let signed = operation.sign(&account.key).unwrap();
            let tx = self.ledger.submit(signed).unwrap();
            self.ledger.receipt(&tx).unwrap().clone()
        }

        fn deploy_calls(&self, amount: Amount, approve: Amount) -> Vec<Call> {
            vec![
                Call::token(
                    self.asset,
                    TokenCall::Approve {
                        spender: self.factory,
                        amount: approve,
                    },
                ),
                Call::factory(
                    self.factory,
                    FactoryCall::DeployContract(DeployRequest {
                        worker: self.worker.address,
                        mediator: None,
                        amount,
                        job_id: "job-42".to_string(),
                        oracle_kinds: vec![],
                    }),
                ),
            ]
        }
    }

    fn created(receipt: &Receipt) -> Address {
        receipt
            .events()
            .find_map(|event| match event {
                LedgerEvent::ObjectCreated { address, .. } => Some(*address),
                _ => None,
            })
            .unwrap()
    }

    fn deployed(receipt: &Receipt) -> Address {
        receipt
            .events()
            .find_map(|event| match event {
                LedgerEvent::ContractDeployed { escrow, .. } => Some(*escrow),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_approve_and_deploy_in_one_operation() {
        let mut world = World::new();
        let predicted = world.ledger.factory_summary(&world.factory).unwrap().next_contract_address;
        let calls = world.deploy_calls(100, 100);
        let receipt = world.send("employer", calls);

        assert!(receipt.succeeded());
        let escrow = deployed(&receipt);
        assert_eq!(escrow, predicted);
        assert_eq!(world.ledger.escrow_balance(&escrow).unwrap(), 100);
        assert_eq!(
            world.ledger.escrow_details(&escrow).unwrap().state,
            EscrowState::Funded
        );
        assert_eq!(
            world
                .ledger
                .allowance(&world.asset, &world.employer.address, &world.factory)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_failed_call_reverts_whole_operation() {
        let mut world = World::new();
        let calls = world.deploy_calls(100, 50);
        let receipt = world.send("employer", calls);

        match &receipt.status {
            ReceiptStatus::Reverted { kind, reason } => {
                assert_eq!(*kind, RevertKind::PreconditionFailed);
                assert!(reason.contains("Insufficient allowance"));
            }
            other => panic!("expected revert, got {:?}", other),
        }
        assert!(receipt.logs.is_empty());
        // The approval in the first call did not survive the revert
        assert_eq!(
            world
                .ledger
                .allowance(&world.asset, &world.employer.address, &world.factory)
                .unwrap(),
            0
        );
        assert_eq!(world.ledger.factory_summary(&world.factory).unwrap().total_contracts, 0);
        assert_eq!(world.ledger.nonce(&world.employer.address), 1);
    }

    #[test]
    fn test_simulate_leaves_state_untouched() {
        let world = World::new();
        let operation = UnsignedOperation {
            chain_id: CHAIN_ID,
            from: world.employer.address,
            nonce: 0,
            calls: world.deploy_calls(100, 100),
        };
        let logs = world.ledger.simulate(&operation).unwrap();
        assert!(logs
            .iter()
            .any(|log| matches!(log.event, LedgerEvent::ContractDeployed { .. })));
        assert_eq!(world.ledger.factory_summary(&world.factory).unwrap().total_contracts, 0);
    }

    #[test]
    fn test_rejects_stale_nonce_and_wrong_chain() {
        let mut world = World::new();
        let calls = world.deploy_calls(10, 10);
        world.send("employer", calls.clone());

        let stale = UnsignedOperation {
            chain_id: CHAIN_ID,
            from: world.employer.address,
            nonce: 0,
            calls: calls.clone(),
        }
        .sign(&world.employer.key)
        .unwrap();
        assert!(matches!(
            world.ledger.submit(stale),
            Err(LedgerError::NonceTooLow { expected: 1, got: 0 })
        ));

        let foreign = UnsignedOperation {
            chain_id: 1,
            from: world.employer.address,
            nonce: 1,
            calls,
        }
        .sign(&world.employer.key)
        .unwrap();
        assert!(matches!(
            world.ledger.submit(foreign),
            Err(LedgerError::WrongChain { .. })
        ));
    }

    #[test]
    fn test_value_is_rejected() {
        let mut world = World::new();
        let mut calls = world.deploy_calls(10, 10);
        calls[0].value = 1;
        let receipt = world.send("employer", calls);
        assert!(!receipt.succeeded());
    }

    #[test]
    fn test_oracle_verify_and_pay_batch() {
        let mut world = World::new();
        let receipt = world.send("admin", vec![Call::create(Deployment::ManualOracle)]);
        let oracle = created(&receipt);
        let factory = world.factory;
        let receipt = world.send(
            "admin",
            vec![Call::factory(factory, FactoryCall::RegisterOracle { oracle })],
        );
        assert!(receipt.succeeded());

        let mut calls = world.deploy_calls(100, 100);
        if let CallData::Factory(FactoryCall::DeployContract(request)) = &mut calls[1].payload {
            request.oracle_kinds = vec![OracleKind::Manual];
        }
        let escrow = deployed(&world.send("employer", calls));
        assert!(!world.ledger.check_oracles(&escrow).unwrap());

        let receipt = world.send(
            "employer",
            vec![Call::escrow(escrow, EscrowCall::ApproveAndPay)],
        );
        assert_eq!(
            receipt.status,
            ReceiptStatus::Reverted {
                kind: RevertKind::PreconditionFailed,
                reason: "Work not verified by oracles".to_string()
            }
        );

        let receipt = world.send(
            "employer",
            vec![
                Call::oracle(oracle, OracleCall::Verify { target: escrow }),
                Call::escrow(escrow, EscrowCall::ApproveAndPay),
            ],
        );
        assert!(receipt.succeeded());
        assert!(world.ledger.is_work_verified(&oracle, &escrow).unwrap());
        assert_eq!(
            world
                .ledger
                .asset_balance(&world.asset, &world.worker.address)
                .unwrap(),
            100
        );
    }

    #[test]
    fn test_creation_must_target_zero_address() {
        let mut world = World::new();
        let mut call = Call::create(Deployment::ManualOracle);
        call.target = world.factory;
        let receipt = world.send("admin", vec![call]);
        assert!(!receipt.succeeded());
    }
}
