//! Escrow contract - per-job custody of funds
//!
//! An escrow is created already holding `payment_amount` of its asset. Funds
//! leave it exactly once: to the worker on approval, split by a mediator after
//! a dispute, or back to the employer on cancellation. Terminal escrows stay
//! queryable forever.

use crate::events::{LedgerEvent, LogEntry};
use crate::oracle::{Oracle, OracleInstance};
use crate::token::TokenLedger;
use crate::types::{Address, Amount, JobId};
use crate::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Escrow state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowState {
    /// Created and holding funds
    Funded,
    /// Reserved; accepted by every guard that accepts `Funded` except cancellation
    Active,
    /// Funds released to the worker, in full or by split
    Completed,
    /// Funds returned to the employer by mediation
    Refunded,
    /// Funds returned to the employer before any dispute
    Cancelled,
    /// Awaiting a mediator decision
    Disputed,
}

impl EscrowState {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded | Self::Cancelled)
    }

    /// Check if this state allows releasing funds to the worker
    pub fn can_release(&self) -> bool {
        matches!(self, Self::Funded | Self::Active)
    }

    /// Check if this state allows raising a dispute
    pub fn can_dispute(&self) -> bool {
        matches!(self, Self::Funded | Self::Active)
    }

    /// Check if this state allows a mediator decision
    pub fn can_resolve(&self) -> bool {
        matches!(self, Self::Disputed)
    }

    /// Check if this state allows cancellation
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Funded)
    }
}

/// Construction parameters
#[derive(Debug, Clone)]
pub struct EscrowParams {
    /// Address the escrow occupies
    pub address: Address,
    /// Account that funds the job and approves payment
    pub employer: Address,
    /// Account paid on approval
    pub worker: Address,
    /// Party allowed to split funds after a dispute
    pub mediator: Option<Address>,
    /// Asset the payment is held in
    pub asset: Address,
    /// Amount the escrow must hold at creation
    pub payment_amount: Amount,
    /// Off-ledger job posting this escrow pays for
    pub job_id: JobId,
    /// Factory admin at creation; may assign a mediator
    pub admin: Address,
    /// Oracles that must all verify before payment
    pub oracles: Vec<Address>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Read-only view returned by `getDetails`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowDetails {
    /// Escrow address
    pub address: Address,
    /// Funding account
    pub employer: Address,
    /// Account paid on approval
    pub worker: Address,
    /// Assigned mediator, if any
    pub mediator: Option<Address>,
    /// Admin allowed to assign a mediator
    pub admin: Address,
    /// Asset held
    pub asset: Address,
    /// Amount owed to the parties; 0 once disbursed
    pub payment_amount: Amount,
    /// Off-ledger job posting id
    pub job_id: JobId,
    /// Current state
    pub state: EscrowState,
    /// Reason given when the dispute was raised
    pub dispute_reason: Option<String>,
    /// Oracles gating payment
    pub oracles: Vec<Address>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Everything a call into an escrow may touch besides the escrow itself
pub struct EscrowEnv<'a> {
    pub caller: Address,
    pub token: &'a mut TokenLedger,
    pub oracles: &'a BTreeMap<Address, OracleInstance>,
    pub logs: &'a mut Vec<LogEntry>,
}

#[derive(Debug, Clone)]
pub struct EscrowContract {
    address: Address,
    employer: Address,
    worker: Address,
    mediator: Option<Address>,
    admin: Address,
    asset: Address,
    payment_amount: Amount,
    job_id: JobId,
    state: EscrowState,
    dispute_reason: Option<String>,
    oracles: Vec<Address>,
    created_at: DateTime<Utc>,
}

impl EscrowContract {
    /// Validate parties and build an escrow in `Funded`.
    ///
    /// Funding is checked separately with [`EscrowContract::ensure_funded`]
    /// once the creator has moved the payment to `params.address`.
    pub fn new(params: EscrowParams) -> LedgerResult<Self> {
        if params.worker == params.employer {
            return Err(LedgerError::permission_denied("Worker cannot be employer"));
        }
        if params.worker.is_zero() {
            return Err(LedgerError::precondition("Worker cannot be the zero address"));
        }
        if params.mediator.is_some_and(|m| m.is_zero()) {
            return Err(LedgerError::precondition("Mediator cannot be the zero address"));
        }
        if params.payment_amount == 0 {
            return Err(LedgerError::precondition("Payment amount must be greater than 0"));
        }

        Ok(Self {
            address: params.address,
            employer: params.employer,
            worker: params.worker,
            mediator: params.mediator,
            admin: params.admin,
            asset: params.asset,
            payment_amount: params.payment_amount,
            job_id: params.job_id,
            state: EscrowState::Funded,
            dispute_reason: None,
            oracles: params.oracles,
            created_at: params.created_at,
        })
    }

    /// Check that the escrow holds at least its payment amount
    pub fn ensure_funded(&self, token: &TokenLedger) -> LedgerResult<()> {
        let balance = self.balance(token);
        if balance < self.payment_amount {
            return Err(LedgerError::precondition(format!(
                "Escrow holds {} but payment amount is {}",
                balance, self.payment_amount
            )));
        }
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn employer(&self) -> Address {
        self.employer
    }

    pub fn worker(&self) -> Address {
        self.worker
    }

    pub fn mediator(&self) -> Option<Address> {
        self.mediator
    }

    pub fn asset(&self) -> Address {
        self.asset
    }

    pub fn state(&self) -> EscrowState {
        self.state
    }

    pub fn payment_amount(&self) -> Amount {
        self.payment_amount
    }

    pub fn oracles(&self) -> &[Address] {
        &self.oracles
    }

    /// Current holdings, read from the asset ledger
    pub fn balance(&self, token: &TokenLedger) -> Amount {
        token.balance_of(&self.address)
    }

    pub fn details(&self) -> EscrowDetails {
        EscrowDetails {
            address: self.address,
            employer: self.employer,
            worker: self.worker,
            mediator: self.mediator,
            admin: self.admin,
            asset: self.asset,
            payment_amount: self.payment_amount,
            job_id: self.job_id.clone(),
            state: self.state,
            dispute_reason: self.dispute_reason.clone(),
            oracles: self.oracles.clone(),
            created_at: self.created_at,
        }
    }

    /// True iff no oracle is attached or every attached oracle reports verified
    pub fn check_oracles(&self, oracles: &BTreeMap<Address, OracleInstance>) -> bool {
        self.oracles.iter().all(|address| {
            oracles
                .get(address)
                .is_some_and(|oracle| oracle.is_work_verified(&self.address))
        })
    }

    /// Release the full balance to the worker
    pub fn approve_and_pay(&mut self, env: &mut EscrowEnv<'_>) -> LedgerResult<Amount> {
        if env.caller != self.employer {
            return Err(LedgerError::permission_denied("Only employer can approve"));
        }
        if !self.state.can_release() {
            return Err(self.state_error("approve payment"));
        }
        if !self.check_oracles(env.oracles) {
            return Err(LedgerError::precondition("Work not verified by oracles"));
        }

        let amount = self.balance(env.token);
        env.token
            .transfer(self.address, self.worker, amount, env.logs)?;
        self.state = EscrowState::Completed;
        self.payment_amount = 0;

        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::WorkApproved {
                worker: self.worker,
                amount,
            },
        ));
        Ok(amount)
    }

    pub fn raise_dispute(&mut self, env: &mut EscrowEnv<'_>, reason: &str) -> LedgerResult<()> {
        if env.caller != self.employer && env.caller != self.worker {
            return Err(LedgerError::permission_denied(
                "Only employer or worker can raise a dispute",
            ));
        }
        if !self.state.can_dispute() {
            return Err(self.state_error("raise a dispute"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::precondition("Dispute reason cannot be empty"));
        }

        self.state = EscrowState::Disputed;
        self.dispute_reason = Some(reason.to_string());

        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::DisputeRaised {
                raised_by: env.caller,
                reason: reason.to_string(),
            },
        ));
        Ok(())
    }

    pub fn assign_mediator(&mut self, env: &mut EscrowEnv<'_>, mediator: Address) -> LedgerResult<()> {
        if env.caller != self.admin {
            return Err(LedgerError::permission_denied("Only admin can assign a mediator"));
        }
        if mediator.is_zero() {
            return Err(LedgerError::precondition("Mediator cannot be the zero address"));
        }

        self.mediator = Some(mediator);
        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::MediatorAssigned { mediator },
        ));
        Ok(())
    }

    /// Split the balance: the worker gets `floor(balance * pct / 100)`, the
    /// employer the remainder. Returns `(worker_amount, employer_amount)`.
    pub fn resolve_dispute(
        &mut self,
        env: &mut EscrowEnv<'_>,
        worker_percent: u8,
    ) -> LedgerResult<(Amount, Amount)> {
        let mediator = match self.mediator {
            Some(mediator) if mediator == env.caller => mediator,
            Some(_) => return Err(LedgerError::permission_denied("Only mediator can resolve")),
            None => return Err(LedgerError::permission_denied("No mediator assigned")),
        };
        if !self.state.can_resolve() {
            return Err(self.state_error("resolve a dispute"));
        }
        if worker_percent > 100 {
            return Err(LedgerError::precondition(format!(
                "Worker percentage {} exceeds 100",
                worker_percent
            )));
        }

        let balance = self.balance(env.token);
        let (worker_amount, employer_amount) = split_balance(balance, worker_percent);
        if worker_amount > 0 {
            env.token
                .transfer(self.address, self.worker, worker_amount, env.logs)?;
        }
        if employer_amount > 0 {
            env.token
                .transfer(self.address, self.employer, employer_amount, env.logs)?;
        }

        self.state = if worker_amount > 0 {
            EscrowState::Completed
        } else {
            EscrowState::Refunded
        };
        self.payment_amount = 0;

        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::DisputeResolved {
                mediator,
                worker_amount,
                employer_amount,
            },
        ));
        Ok((worker_amount, employer_amount))
    }

    /// Refund the full balance to the employer
    pub fn cancel_contract(&mut self, env: &mut EscrowEnv<'_>) -> LedgerResult<Amount> {
        if env.caller != self.employer {
            return Err(LedgerError::permission_denied("Only employer can cancel"));
        }
        if !self.state.can_cancel() {
            return Err(self.state_error("cancel"));
        }

        let refund = self.balance(env.token);
        env.token
            .transfer(self.address, self.employer, refund, env.logs)?;
        self.state = EscrowState::Cancelled;
        self.payment_amount = 0;

        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::ContractCancelled {
                employer: self.employer,
                refund,
            },
        ));
        Ok(refund)
    }

    /// Pull `amount` from the caller into the escrow
    pub fn top_up(&mut self, env: &mut EscrowEnv<'_>, amount: Amount) -> LedgerResult<()> {
        if amount == 0 {
            return Err(LedgerError::precondition("Top-up amount must be greater than 0"));
        }
        if self.state.is_terminal() {
            return Err(self.state_error("top up"));
        }
        let payment_amount = self
            .payment_amount
            .checked_add(amount)
            .ok_or_else(|| LedgerError::precondition("Payment amount overflow"))?;

        env.token
            .transfer_from(self.address, env.caller, self.address, amount, env.logs)?;
        self.payment_amount = payment_amount;

        env.logs.push(LogEntry::new(
            self.address,
            LedgerEvent::EscrowTopUp {
                from: env.caller,
                amount,
            },
        ));
        Ok(())
    }

    fn state_error(&self, action: &str) -> LedgerError {
        LedgerError::invalid_state(format!("Cannot {} while {:?}", action, self.state))
    }
}

/// `(floor(balance * pct / 100), remainder)` without intermediate overflow
fn split_balance(balance: Amount, worker_percent: u8) -> (Amount, Amount) {
    let pct = Amount::from(worker_percent);
    let worker_amount = (balance / 100) * pct + (balance % 100) * pct / 100;
    (worker_amount, balance - worker_amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{ManualOracle, VerifyRequest};
    use crate::RevertKind;

    fn addr(n: u64) -> Address {
        Address::derive(&Address::ZERO, n)
    }

    const EMPLOYER: u64 = 1;
    const WORKER: u64 = 2;
    const ADMIN: u64 = 3;
    const MEDIATOR: u64 = 4;
    const STRANGER: u64 = 5;

    struct Fixture {
        escrow: EscrowContract,
        token: TokenLedger,
        oracles: BTreeMap<Address, OracleInstance>,
        logs: Vec<LogEntry>,
    }

    impl Fixture {
        fn new(amount: Amount, oracles: Vec<Address>) -> Self {
            let escrow_address = addr(100);
            let mut token = TokenLedger::new(addr(0), "USDC");
            token.mint(escrow_address, amount).unwrap();
            token.mint(addr(EMPLOYER), 1_000).unwrap();
            token.mint(addr(STRANGER), 1_000).unwrap();

            let escrow = EscrowContract::new(EscrowParams {
                address: escrow_address,
                employer: addr(EMPLOYER),
                worker: addr(WORKER),
                mediator: None,
                asset: token.address(),
                payment_amount: amount,
                job_id: "job-1".to_string(),
                admin: addr(ADMIN),
                oracles,
                created_at: Utc::now(),
            })
            .unwrap();
            escrow.ensure_funded(&token).unwrap();

            Self {
                escrow,
                token,
                oracles: BTreeMap::new(),
                logs: Vec::new(),
            }
        }

        fn call<T>(
            &mut self,
            caller: u64,
            f: impl FnOnce(&mut EscrowContract, &mut EscrowEnv<'_>) -> LedgerResult<T>,
        ) -> LedgerResult<T> {
            let mut env = EscrowEnv {
                caller: addr(caller),
                token: &mut self.token,
                oracles: &self.oracles,
                logs: &mut self.logs,
            };
            f(&mut self.escrow, &mut env)
        }

        fn balance(&self) -> Amount {
            self.escrow.balance(&self.token)
        }

        fn disputed_with_mediator(amount: Amount) -> Self {
            let mut fx = Self::new(amount, vec![]);
            fx.call(WORKER, |e, env| e.raise_dispute(env, "late delivery"))
                .unwrap();
            fx.call(ADMIN, |e, env| e.assign_mediator(env, addr(MEDIATOR)))
                .unwrap();
            fx
        }
    }

    fn params(employer: Address, worker: Address) -> EscrowParams {
        EscrowParams {
            address: addr(100),
            employer,
            worker,
            mediator: None,
            asset: addr(0),
            payment_amount: 10,
            job_id: "job".to_string(),
            admin: addr(ADMIN),
            oracles: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_worker_cannot_be_employer() {
        let err = EscrowContract::new(params(addr(1), addr(1))).unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PermissionDenied));
    }

    #[test]
    fn test_unfunded_escrow_rejected() {
        let token = TokenLedger::new(addr(0), "USDC");
        let escrow = EscrowContract::new(params(addr(1), addr(2))).unwrap();
        assert!(escrow.ensure_funded(&token).is_err());
    }

    #[test]
    fn test_created_funded() {
        let fx = Fixture::new(100, vec![]);
        assert_eq!(fx.escrow.state(), EscrowState::Funded);
        assert_eq!(fx.balance(), 100);
        assert!(fx.escrow.check_oracles(&fx.oracles));
    }

    #[test]
    fn test_approve_and_pay_releases_everything() {
        let mut fx = Fixture::new(100, vec![]);
        let paid = fx.call(EMPLOYER, |e, env| e.approve_and_pay(env)).unwrap();

        assert_eq!(paid, 100);
        assert_eq!(fx.token.balance_of(&addr(WORKER)), 100);
        assert_eq!(fx.balance(), 0);
        assert_eq!(fx.escrow.state(), EscrowState::Completed);
        assert_eq!(fx.escrow.payment_amount(), 0);
    }

    #[test]
    fn test_approve_and_pay_rejects_wrong_caller_and_state() {
        let mut fx = Fixture::new(100, vec![]);
        let err = fx.call(WORKER, |e, env| e.approve_and_pay(env)).unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PermissionDenied));
        assert_eq!(fx.escrow.state(), EscrowState::Funded);

        fx.call(EMPLOYER, |e, env| e.raise_dispute(env, "bad work"))
            .unwrap();
        let err = fx.call(EMPLOYER, |e, env| e.approve_and_pay(env)).unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::InvalidStateTransition));
        assert_eq!(fx.escrow.state(), EscrowState::Disputed);
        assert_eq!(fx.balance(), 100);
    }

    #[test]
    fn test_oracle_gates_payment() {
        let oracle_address = addr(50);
        let mut fx = Fixture::new(100, vec![oracle_address]);
        fx.oracles
            .insert(oracle_address, OracleInstance::Manual(ManualOracle::new()));

        let err = fx.call(EMPLOYER, |e, env| e.approve_and_pay(env)).unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PreconditionFailed));

        let escrow_address = fx.escrow.address();
        fx.oracles
            .get_mut(&oracle_address)
            .unwrap()
            .verify(&VerifyRequest {
                caller: addr(EMPLOYER),
                target: escrow_address,
                target_employer: Some(addr(EMPLOYER)),
            })
            .unwrap();

        fx.call(EMPLOYER, |e, env| e.approve_and_pay(env)).unwrap();
        assert_eq!(fx.token.balance_of(&addr(WORKER)), 100);
    }

    #[test]
    fn test_missing_oracle_object_is_unverified() {
        let fx = Fixture::new(100, vec![addr(77)]);
        assert!(!fx.escrow.check_oracles(&fx.oracles));
    }

    #[test]
    fn test_raise_dispute_rules() {
        let mut fx = Fixture::new(100, vec![]);
        let err = fx
            .call(STRANGER, |e, env| e.raise_dispute(env, "x"))
            .unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PermissionDenied));

        let err = fx
            .call(WORKER, |e, env| e.raise_dispute(env, "   "))
            .unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PreconditionFailed));

        fx.call(WORKER, |e, env| e.raise_dispute(env, "not paid"))
            .unwrap();
        assert_eq!(fx.escrow.state(), EscrowState::Disputed);
        assert_eq!(fx.escrow.details().dispute_reason.as_deref(), Some("not paid"));

        let err = fx
            .call(EMPLOYER, |e, env| e.raise_dispute(env, "again"))
            .unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::InvalidStateTransition));
    }

    #[test]
    fn test_only_admin_assigns_mediator() {
        let mut fx = Fixture::new(100, vec![]);
        let err = fx
            .call(EMPLOYER, |e, env| e.assign_mediator(env, addr(MEDIATOR)))
            .unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PermissionDenied));
        assert_eq!(fx.escrow.mediator(), None);

        fx.call(ADMIN, |e, env| e.assign_mediator(env, addr(MEDIATOR)))
            .unwrap();
        assert_eq!(fx.escrow.mediator(), Some(addr(MEDIATOR)));
    }

    #[test]
    fn test_resolve_even_split() {
        let mut fx = Fixture::disputed_with_mediator(100);
        let (worker, employer) = fx
            .call(MEDIATOR, |e, env| e.resolve_dispute(env, 50))
            .unwrap();
        assert_eq!((worker, employer), (50, 50));
        assert_eq!(fx.token.balance_of(&addr(WORKER)), 50);
        assert_eq!(fx.token.balance_of(&addr(EMPLOYER)), 1_050);
        assert_eq!(fx.escrow.state(), EscrowState::Completed);
    }

    #[test]
    fn test_resolve_extremes() {
        let mut fx = Fixture::disputed_with_mediator(100);
        let split = fx
            .call(MEDIATOR, |e, env| e.resolve_dispute(env, 0))
            .unwrap();
        assert_eq!(split, (0, 100));
        assert_eq!(fx.escrow.state(), EscrowState::Refunded);

        let mut fx = Fixture::disputed_with_mediator(100);
        let split = fx
            .call(MEDIATOR, |e, env| e.resolve_dispute(env, 100))
            .unwrap();
        assert_eq!(split, (100, 0));
        assert_eq!(fx.escrow.state(), EscrowState::Completed);
    }

    #[test]
    fn test_resolve_rounds_toward_employer() {
        let mut fx = Fixture::disputed_with_mediator(7);
        let split = fx
            .call(MEDIATOR, |e, env| e.resolve_dispute(env, 33))
            .unwrap();
        assert_eq!(split, (2, 5));
    }

    #[test]
    fn test_resolve_requires_mediator_and_dispute() {
        let mut fx = Fixture::new(100, vec![]);
        let err = fx
            .call(MEDIATOR, |e, env| e.resolve_dispute(env, 50))
            .unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PermissionDenied));

        fx.call(ADMIN, |e, env| e.assign_mediator(env, addr(MEDIATOR)))
            .unwrap();
        let err = fx
            .call(MEDIATOR, |e, env| e.resolve_dispute(env, 50))
            .unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::InvalidStateTransition));

        let mut fx = Fixture::disputed_with_mediator(100);
        let err = fx
            .call(EMPLOYER, |e, env| e.resolve_dispute(env, 50))
            .unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PermissionDenied));
        let err = fx
            .call(MEDIATOR, |e, env| e.resolve_dispute(env, 101))
            .unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PreconditionFailed));
        assert_eq!(fx.balance(), 100);
    }

    #[test]
    fn test_split_conserves_balance() {
        for balance in [0u128, 1, 7, 99, 100, 101, 12_345, u128::MAX] {
            for pct in 0..=100u8 {
                let (worker, employer) = split_balance(balance, pct);
                assert_eq!(worker + employer, balance);
                if pct == 100 {
                    assert_eq!(employer, 0);
                }
                if pct == 0 {
                    assert_eq!(worker, 0);
                }
            }
        }
    }

    #[test]
    fn test_cancel_only_while_funded() {
        let mut fx = Fixture::new(100, vec![]);
        let err = fx.call(WORKER, |e, env| e.cancel_contract(env)).unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::PermissionDenied));

        let refund = fx.call(EMPLOYER, |e, env| e.cancel_contract(env)).unwrap();
        assert_eq!(refund, 100);
        assert_eq!(fx.token.balance_of(&addr(EMPLOYER)), 1_100);
        assert_eq!(fx.escrow.state(), EscrowState::Cancelled);

        let err = fx.call(EMPLOYER, |e, env| e.cancel_contract(env)).unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::InvalidStateTransition));

        let mut fx = Fixture::new(100, vec![]);
        fx.call(WORKER, |e, env| e.raise_dispute(env, "x")).unwrap();
        let err = fx.call(EMPLOYER, |e, env| e.cancel_contract(env)).unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::InvalidStateTransition));
    }

    #[test]
    fn test_top_up_by_anyone() {
        let mut fx = Fixture::new(100, vec![]);
        let escrow_address = fx.escrow.address();
        let mut logs = Vec::new();
        fx.token
            .approve(addr(STRANGER), escrow_address, 40, &mut logs)
            .unwrap();

        fx.call(STRANGER, |e, env| e.top_up(env, 40)).unwrap();
        assert_eq!(fx.escrow.payment_amount(), 140);
        assert_eq!(fx.balance(), 140);
        assert_eq!(fx.escrow.state(), EscrowState::Funded);

        let err = fx.call(STRANGER, |e, env| e.top_up(env, 1)).unwrap_err();
        assert!(err.to_string().contains("Insufficient allowance"));
        assert_eq!(fx.escrow.payment_amount(), 140);
    }

    #[test]
    fn test_top_up_rejected_after_completion() {
        let mut fx = Fixture::new(100, vec![]);
        fx.call(EMPLOYER, |e, env| e.approve_and_pay(env)).unwrap();
        let err = fx.call(EMPLOYER, |e, env| e.top_up(env, 10)).unwrap_err();
        assert_eq!(err.revert_kind(), Some(RevertKind::InvalidStateTransition));
    }
}
