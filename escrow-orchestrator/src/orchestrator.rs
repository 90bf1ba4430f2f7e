//! Transaction Orchestrator - turns business actions into signed ledger operations
//!
//! Every action is one operation: approvals travel in the same operation as
//! the call that consumes them, and pending oracle attestations travel with
//! the payment they unlock. Each operation reports its progress through a
//! [`ProgressTracker`] and fails with a normalized [`OperationFailure`].
//! Nothing is retried here.

use crate::cancel::CancellationToken;
use crate::client::LedgerClient;
use crate::config::OrchestratorConfig;
use crate::error::{normalize_error, OperationFailure, OrchestratorError};
use crate::explorer::ExplorerLinks;
use crate::OperationResult;
use crate::signer::Signer;
use crate::status::{NoopObserver, OperationStep, ProgressTracker, StatusObserver};
use escrow_ledger::{
    Address, Amount, BatchDeployRequest, Call, DeployRequest, Deployment, EscrowCall,
    EscrowDetails, EscrowState, FactoryCall, FactorySummary, LedgerEvent, ObjectKind, OracleCall,
    OracleKind, Receipt, ReceiptStatus, SignedOperation, TokenCall, TxHash, UnsignedOperation,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

static NOOP_OBSERVER: NoopObserver = NoopObserver;

/// Who signs an operation, who hears about its progress and how it can be aborted
pub struct OperationContext<'a> {
    pub signer: &'a dyn Signer,
    pub observer: &'a dyn StatusObserver,
    pub cancel: CancellationToken,
}

impl<'a> OperationContext<'a> {
    pub fn new(signer: &'a dyn Signer) -> Self {
        Self {
            signer,
            observer: &NOOP_OBSERVER,
            cancel: CancellationToken::never(),
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn StatusObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a confirmed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// Id of the confirmed operation
    pub transaction_id: TxHash,
    /// Confirmation record
    pub receipt: Receipt,
    /// Explorer page for the transaction
    pub explorer_link: String,
}

/// A single escrow deployed through a factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedEscrow {
    /// Address the escrow landed at
    pub escrow: Address,
    /// Address computed before signing
    pub predicted: Address,
    /// Confirmed operation
    pub outcome: OperationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedBatch {
    /// Escrow addresses in request order
    pub escrows: Vec<Address>,
    /// Sum of all payments, approved and consumed in one operation
    pub total: Amount,
    /// Confirmed operation
    pub outcome: OperationOutcome,
}

/// Object created by a creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedObject {
    /// Address of the new object
    pub address: Address,
    /// What was created
    pub kind: ObjectKind,
    /// Confirmed operation
    pub outcome: OperationOutcome,
}

/// Roles an account holds on an escrow and the actions open to it right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionReport {
    /// Escrow inspected
    pub escrow: Address,
    /// Account whose roles are reported
    pub account: Address,
    /// Escrow state at read time
    pub state: EscrowState,
    /// Account funded the escrow
    pub is_employer: bool,
    /// Account is paid on approval
    pub is_worker: bool,
    /// Account is the assigned mediator
    pub is_mediator: bool,
    /// Account may assign a mediator
    pub is_admin: bool,
    /// Every attached oracle has verified
    pub oracles_verified: bool,
    /// Employer and the state allows release
    pub can_approve_and_pay: bool,
    /// Employer or worker and the state allows a dispute
    pub can_raise_dispute: bool,
    /// Mediator and the escrow is disputed
    pub can_resolve_dispute: bool,
    /// Employer and the escrow is still funded
    pub can_cancel: bool,
    /// Admin
    pub can_assign_mediator: bool,
    /// Escrow is not terminal
    pub can_top_up: bool,
}

/// Snapshot of an escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractState {
    /// Escrow details
    pub details: EscrowDetails,
    /// Asset balance held
    pub balance: Amount,
    /// Every attached oracle has verified
    pub oracles_verified: bool,
    /// Explorer page for the escrow address
    pub explorer_link: String,
}

/// Client-side driver for escrow operations
pub struct TransactionOrchestrator {
    client: Arc<dyn LedgerClient>,
    config: OrchestratorConfig,
    explorer: ExplorerLinks,
}

impl TransactionOrchestrator {
    pub fn new(client: Arc<dyn LedgerClient>, config: OrchestratorConfig) -> Self {
        info!(
            "Initializing transaction orchestrator (explorer {}, signature timeout {}s)",
            config.explorer_base_url, config.signature_timeout_secs
        );
        let explorer = ExplorerLinks::new(config.explorer_base_url.clone());
        Self {
            client,
            config,
            explorer,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn explorer(&self) -> &ExplorerLinks {
        &self.explorer
    }

    pub fn client(&self) -> &Arc<dyn LedgerClient> {
        &self.client
    }

    /// Send one call as its own operation
    pub async fn send_operation(
        &self,
        ctx: &OperationContext<'_>,
        call: Call,
    ) -> OperationResult<OperationOutcome> {
        self.send_batch(ctx, vec![call]).await
    }

    /// Send several calls as one all-or-nothing operation
    pub async fn send_batch(
        &self,
        ctx: &OperationContext<'_>,
        calls: Vec<Call>,
    ) -> OperationResult<OperationOutcome> {
        let (outcome, ()) = self
            .send_prepared(ctx, async move { Ok::<_, OrchestratorError>((calls, ())) })
            .await?;
        Ok(outcome)
    }

    /// Run `prepare` while `PreparingOperation`, then sign, submit and confirm
    /// the calls it returns. `prepare` also hands back whatever the caller
    /// needs to interpret the receipt.
    async fn send_prepared<T>(
        &self,
        ctx: &OperationContext<'_>,
        prepare: impl Future<Output = Result<(Vec<Call>, T), OrchestratorError>>,
    ) -> OperationResult<(OperationOutcome, T)> {
        let mut tracker = ProgressTracker::new(ctx.observer);
        match self.execute(ctx, &mut tracker, prepare).await {
            Ok(done) => Ok(done),
            Err(err) => {
                let failure = normalize_error(&err);
                warn!(
                    "Operation {} failed at {:?}: {}",
                    tracker.operation_id(),
                    tracker.step(),
                    err
                );
                tracker.fail(failure.to_string());
                Err(failure)
            }
        }
    }

    async fn execute<T>(
        &self,
        ctx: &OperationContext<'_>,
        tracker: &mut ProgressTracker<'_>,
        prepare: impl Future<Output = Result<(Vec<Call>, T), OrchestratorError>>,
    ) -> Result<(OperationOutcome, T), OrchestratorError> {
        let from = ctx.signer.address();
        tracker.advance(
            OperationStep::PreparingOperation,
            format!("Preparing operation for {}", from),
        )?;
        self.ensure_not_cancelled(ctx)?;

        let (calls, prepared) = prepare.await?;
        if calls.is_empty() {
            return Err(OrchestratorError::invalid_request(
                "Operation must contain at least one call",
            ));
        }
        let labels = calls.iter().map(Call::label).collect::<Vec<_>>().join(" + ");
        self.ensure_not_cancelled(ctx)?;

        let chain_id = self.client.chain_id().await?;
        let nonce = self.client.nonce(&from).await?;
        let operation = UnsignedOperation {
            chain_id,
            from,
            nonce,
            calls,
        };
        if self.config.simulate_before_signing {
            let logs = self.client.simulate(&operation).await?;
            debug!("Simulated {} from {}: {} event(s)", labels, from, logs.len());
        }

        tracker.advance(
            OperationStep::AwaitingSignature,
            format!("Waiting for {} to sign {}", from, labels),
        )?;
        let signed = self.acquire_signature(ctx, operation).await?;
        self.ensure_not_cancelled(ctx)?;

        tracker.advance(OperationStep::Submitting, format!("Submitting {}", labels))?;
        let transaction_id = self.client.submit(signed).await?;

        tracker.advance(
            OperationStep::Confirming,
            format!("Waiting for confirmation of {}", transaction_id),
        )?;
        let receipt = self.client.wait_for_receipt(&transaction_id).await?;
        if let ReceiptStatus::Reverted { kind, reason } = &receipt.status {
            return Err(OrchestratorError::Reverted {
                transaction_id,
                kind: *kind,
                reason: reason.clone(),
            });
        }

        let explorer_link = self.explorer.transaction(&transaction_id);
        tracker.advance(
            OperationStep::Succeeded,
            format!("Confirmed in block {}", receipt.block_number),
        )?;
        info!(
            "{} confirmed as {} in block {}",
            labels, transaction_id, receipt.block_number
        );
        Ok((
            OperationOutcome {
                transaction_id,
                receipt,
                explorer_link,
            },
            prepared,
        ))
    }

    async fn acquire_signature(
        &self,
        ctx: &OperationContext<'_>,
        operation: UnsignedOperation,
    ) -> Result<SignedOperation, OrchestratorError> {
        let timeout = self.config.signature_timeout();
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(OrchestratorError::Cancelled),
            signed = tokio::time::timeout(timeout, ctx.signer.sign(operation)) => match signed {
                Ok(result) => Ok(result?),
                Err(_) => Err(OrchestratorError::SignatureTimeout(timeout.as_secs())),
            },
        }
    }

    fn ensure_not_cancelled(&self, ctx: &OperationContext<'_>) -> Result<(), OrchestratorError> {
        if ctx.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        Ok(())
    }

    // Business operations

    /// Release the escrow. Manual oracles that have not attested yet are
    /// verified in the same operation; other oracle kinds must already agree.
    pub async fn approve_and_pay(
        &self,
        ctx: &OperationContext<'_>,
        escrow: Address,
    ) -> OperationResult<OperationOutcome> {
        let (outcome, ()) = self
            .send_prepared(ctx, async move {
                Ok::<_, OrchestratorError>((self.approve_and_pay_calls(escrow).await?, ()))
            })
            .await?;
        Ok(outcome)
    }

    async fn approve_and_pay_calls(&self, escrow: Address) -> Result<Vec<Call>, OrchestratorError> {
        let details = self.client.escrow_details(&escrow).await?;
        let mut calls = Vec::with_capacity(details.oracles.len() + 1);
        for oracle in &details.oracles {
            if self.client.is_work_verified(oracle, &escrow).await? {
                continue;
            }
            match self.client.oracle_kind(oracle).await? {
                OracleKind::Manual => {
                    debug!("Oracle {} has not verified {}, attesting first", oracle, escrow);
                    calls.push(Call::oracle(*oracle, OracleCall::Verify { target: escrow }));
                }
                kind => debug!("{} oracle {} has not verified {}", kind, oracle, escrow),
            }
        }
        calls.push(Call::escrow(escrow, EscrowCall::ApproveAndPay));
        Ok(calls)
    }

    pub async fn raise_dispute(
        &self,
        ctx: &OperationContext<'_>,
        escrow: Address,
        reason: &str,
    ) -> OperationResult<OperationOutcome> {
        self.send_operation(
            ctx,
            Call::escrow(
                escrow,
                EscrowCall::RaiseDispute {
                    reason: reason.to_string(),
                },
            ),
        )
        .await
    }

    pub async fn resolve_dispute(
        &self,
        ctx: &OperationContext<'_>,
        escrow: Address,
        worker_percent: u8,
    ) -> OperationResult<OperationOutcome> {
        self.send_operation(
            ctx,
            Call::escrow(escrow, EscrowCall::ResolveDispute { worker_percent }),
        )
        .await
    }

    pub async fn assign_mediator(
        &self,
        ctx: &OperationContext<'_>,
        escrow: Address,
        mediator: Address,
    ) -> OperationResult<OperationOutcome> {
        self.send_operation(ctx, Call::escrow(escrow, EscrowCall::AssignMediator { mediator }))
            .await
    }

    pub async fn cancel_contract(
        &self,
        ctx: &OperationContext<'_>,
        escrow: Address,
    ) -> OperationResult<OperationOutcome> {
        self.send_operation(ctx, Call::escrow(escrow, EscrowCall::CancelContract))
            .await
    }

    /// Approve the escrow to pull `amount` and top it up, in one operation
    pub async fn top_up(
        &self,
        ctx: &OperationContext<'_>,
        escrow: Address,
        amount: Amount,
    ) -> OperationResult<OperationOutcome> {
        let prepare = async move {
            let details = self.client.escrow_details(&escrow).await?;
            let calls = vec![
                Call::token(
                    details.asset,
                    TokenCall::Approve {
                        spender: escrow,
                        amount,
                    },
                ),
                Call::escrow(escrow, EscrowCall::TopUp { amount }),
            ];
            Ok::<_, OrchestratorError>((calls, ()))
        };
        let (outcome, ()) = self.send_prepared(ctx, prepare).await?;
        Ok(outcome)
    }

    pub async fn register_oracle(
        &self,
        ctx: &OperationContext<'_>,
        factory: Address,
        oracle: Address,
    ) -> OperationResult<OperationOutcome> {
        self.send_operation(ctx, Call::factory(factory, FactoryCall::RegisterOracle { oracle }))
            .await
    }

    pub async fn remove_oracle(
        &self,
        ctx: &OperationContext<'_>,
        factory: Address,
        kind: OracleKind,
    ) -> OperationResult<OperationOutcome> {
        self.send_operation(ctx, Call::factory(factory, FactoryCall::RemoveOracle { kind }))
            .await
    }

    pub async fn transfer_admin(
        &self,
        ctx: &OperationContext<'_>,
        factory: Address,
        new_admin: Address,
    ) -> OperationResult<OperationOutcome> {
        self.send_operation(
            ctx,
            Call::factory(factory, FactoryCall::TransferAdmin { new_admin }),
        )
        .await
    }

    /// Create a factory or an oracle
    pub async fn create_object(
        &self,
        ctx: &OperationContext<'_>,
        deployment: Deployment,
    ) -> OperationResult<CreatedObject> {
        let outcome = self.send_operation(ctx, Call::create(deployment)).await?;
        self.created_object(outcome)
    }

    pub async fn deploy_oracle(
        &self,
        ctx: &OperationContext<'_>,
        deployment: Deployment,
    ) -> OperationResult<CreatedObject> {
        let prepare = async move {
            if matches!(deployment, Deployment::EscrowFactory { .. }) {
                return Err(OrchestratorError::invalid_request(
                    "Expected an oracle deployment",
                ));
            }
            Ok((vec![Call::create(deployment)], ()))
        };
        let (outcome, ()) = self.send_prepared(ctx, prepare).await?;
        self.created_object(outcome)
    }

    fn created_object(&self, outcome: OperationOutcome) -> OperationResult<CreatedObject> {
        let created = outcome.receipt.events().find_map(|event| match event {
            LedgerEvent::ObjectCreated { address, kind } => Some((*address, *kind)),
            _ => None,
        });
        match created {
            Some((address, kind)) => {
                info!("Created {:?} at {}", kind, address);
                Ok(CreatedObject {
                    address,
                    kind,
                    outcome,
                })
            }
            None => Err(self.missing_event(&outcome, "ObjectCreated")),
        }
    }

    /// Approve the factory and deploy a funded escrow in one operation
    pub async fn deploy_escrow(
        &self,
        ctx: &OperationContext<'_>,
        factory: Address,
        request: DeployRequest,
    ) -> OperationResult<DeployedEscrow> {
        let prepare = async move {
            let summary = self.client.factory_summary(&factory).await?;
            let predicted = summary.next_contract_address;
            info!(
                "Deploying escrow for job {} ({} to {}), expected at {}",
                request.job_id, request.amount, request.worker, predicted
            );
            let calls = vec![
                Call::token(
                    summary.asset,
                    TokenCall::Approve {
                        spender: factory,
                        amount: request.amount,
                    },
                ),
                Call::factory(factory, FactoryCall::DeployContract(request)),
            ];
            Ok::<_, OrchestratorError>((calls, predicted))
        };
        let (outcome, predicted) = self.send_prepared(ctx, prepare).await?;

        let escrow = outcome.receipt.events().find_map(|event| match event {
            LedgerEvent::ContractDeployed { escrow, .. } => Some(*escrow),
            _ => None,
        });
        match escrow {
            Some(escrow) => {
                if escrow != predicted {
                    warn!(
                        "Escrow landed at {} instead of predicted {}; another deployment went first",
                        escrow, predicted
                    );
                }
                Ok(DeployedEscrow {
                    escrow,
                    predicted,
                    outcome,
                })
            }
            None => Err(self.missing_event(&outcome, "ContractDeployed")),
        }
    }

    /// Approve the batch total and deploy every escrow in one operation
    pub async fn deploy_batch(
        &self,
        ctx: &OperationContext<'_>,
        factory: Address,
        requests: Vec<DeployRequest>,
    ) -> OperationResult<DeployedBatch> {
        let prepare = async move {
            let total = requests
                .iter()
                .try_fold(0 as Amount, |acc, r| acc.checked_add(r.amount))
                .ok_or_else(|| OrchestratorError::invalid_request("Batch total overflow"))?;
            let summary = self.client.factory_summary(&factory).await?;
            info!(
                "Deploying batch of {} escrows totalling {} through {}",
                requests.len(),
                total,
                factory
            );

            let batch: BatchDeployRequest = requests.into_iter().collect();
            let calls = vec![
                Call::token(
                    summary.asset,
                    TokenCall::Approve {
                        spender: factory,
                        amount: total,
                    },
                ),
                Call::factory(factory, FactoryCall::DeployBatch(batch)),
            ];
            Ok::<_, OrchestratorError>((calls, total))
        };
        let (outcome, total) = self.send_prepared(ctx, prepare).await?;

        let escrows = outcome.receipt.events().find_map(|event| match event {
            LedgerEvent::BatchDeployed { escrows, .. } => Some(escrows.clone()),
            _ => None,
        });
        match escrows {
            Some(escrows) => Ok(DeployedBatch {
                escrows,
                total,
                outcome,
            }),
            None => Err(self.missing_event(&outcome, "BatchDeployed")),
        }
    }

    fn missing_event(&self, outcome: &OperationOutcome, event: &str) -> OperationFailure {
        normalize_error(&OrchestratorError::UnexpectedReceipt {
            transaction_id: outcome.transaction_id,
            message: format!("Receipt has no {} event", event),
        })
    }

    // Read helpers

    /// Roles `account` holds on `escrow` and what it may do in the current state
    pub async fn check_permissions(
        &self,
        escrow: Address,
        account: Address,
    ) -> OperationResult<PermissionReport> {
        let details = self
            .client
            .escrow_details(&escrow)
            .await
            .map_err(|e| normalize_error(&e.into()))?;
        let oracles_verified = self
            .client
            .check_oracles(&escrow)
            .await
            .map_err(|e| normalize_error(&e.into()))?;

        let state = details.state;
        let is_employer = details.employer == account;
        let is_worker = details.worker == account;
        let is_mediator = details.mediator == Some(account);
        let is_admin = details.admin == account;

        Ok(PermissionReport {
            escrow,
            account,
            state,
            is_employer,
            is_worker,
            is_mediator,
            is_admin,
            oracles_verified,
            can_approve_and_pay: is_employer && state.can_release(),
            can_raise_dispute: (is_employer || is_worker) && state.can_dispute(),
            can_resolve_dispute: is_mediator && state.can_resolve(),
            can_cancel: is_employer && state.can_cancel(),
            can_assign_mediator: is_admin,
            can_top_up: !state.is_terminal(),
        })
    }

    pub async fn get_contract_state(&self, escrow: Address) -> OperationResult<ContractState> {
        let read = async {
            let details = self.client.escrow_details(&escrow).await?;
            let balance = self.client.escrow_balance(&escrow).await?;
            let oracles_verified = self.client.check_oracles(&escrow).await?;
            Ok::<_, OrchestratorError>(ContractState {
                details,
                balance,
                oracles_verified,
                explorer_link: self.explorer.address(&escrow),
            })
        };
        read.await.map_err(|e| normalize_error(&e))
    }

    pub async fn factory_info(&self, factory: Address) -> OperationResult<FactorySummary> {
        self.client
            .factory_summary(&factory)
            .await
            .map_err(|e| normalize_error(&e.into()))
    }

    /// Address the next single deployment through `factory` will occupy
    pub async fn predict_escrow_address(&self, factory: Address) -> OperationResult<Address> {
        Ok(self.factory_info(factory).await?.next_contract_address)
    }

    pub async fn asset_balance(&self, asset: Address, owner: Address) -> OperationResult<Amount> {
        self.client
            .asset_balance(&asset, &owner)
            .await
            .map_err(|e| normalize_error(&e.into()))
    }

    pub async fn allowance(
        &self,
        asset: Address,
        owner: Address,
        spender: Address,
    ) -> OperationResult<Amount> {
        self.client
            .allowance(&asset, &owner, &spender)
            .await
            .map_err(|e| normalize_error(&e.into()))
    }
}
