//! Escrow flows run against a fresh in-process ledger

use anyhow::Context;
use chrono::Utc;
use escrow_ledger::{Address, Amount, Call, DeployRequest, Deployment, EscrowCall, Ledger, OracleKind};
use escrow_orchestrator::{
    AdminRegistry, DeploymentRecord, FactoryConfig, HttpJobMirror, InMemoryMirror, InProcessClient,
    JobMirror, LocalSigner, OperationContext, OperationOutcome, OrchestratorConfig, PaymentKind,
    PaymentRecord, Signer, StatusObserver, StatusUpdate, TransactionOrchestrator,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const STARTING_BALANCE: Amount = 10_000;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Deploy an escrow and release it to the worker
    Pay,
    /// Gate payment behind a manual oracle and pay with verification bundled in
    Oracle,
    /// Raise a dispute and split the funds through a mediator
    Dispute,
    /// Deploy several escrows behind one allowance
    Batch,
    /// Add funds to an escrow, then cancel it for a full refund
    TopUp,
    /// Replace a factory whose admin key was lost
    Recover,
}

struct Parties {
    admin: LocalSigner,
    employer: LocalSigner,
    worker: LocalSigner,
    mediator: LocalSigner,
}

struct Session {
    orchestrator: Arc<TransactionOrchestrator>,
    mirror: Box<dyn JobMirror>,
    asset: Address,
    factory: Address,
    parties: Parties,
}

/// Logs each progress step
struct LogObserver;

impl StatusObserver for LogObserver {
    fn on_status(&self, update: &StatusUpdate) {
        info!("[{:?}] {}", update.step, update.message);
    }
}

fn mirror_for(config: &OrchestratorConfig) -> anyhow::Result<Box<dyn JobMirror>> {
    Ok(match &config.mirror_url {
        Some(url) => Box::new(HttpJobMirror::new(url, config.mirror_timeout())?),
        None => Box::new(InMemoryMirror::new()),
    })
}

impl Session {
    async fn open(chain_id: u64, config: OrchestratorConfig) -> anyhow::Result<Self> {
        let parties = Parties {
            admin: LocalSigner::from_seed("demo-admin")?,
            employer: LocalSigner::from_seed("demo-employer")?,
            worker: LocalSigner::from_seed("demo-worker")?,
            mediator: LocalSigner::from_seed("demo-mediator")?,
        };

        let mut ledger = Ledger::new(chain_id);
        let asset = ledger.create_asset("USDC");
        ledger.mint(&asset, parties.employer.address(), STARTING_BALANCE)?;

        let mirror = mirror_for(&config)?;
        let client = Arc::new(InProcessClient::new(ledger.shared()));
        let orchestrator = Arc::new(TransactionOrchestrator::new(client, config));

        let factory = orchestrator
            .create_object(
                &OperationContext::new(&parties.admin),
                Deployment::EscrowFactory {
                    admin: parties.admin.address(),
                    asset,
                },
            )
            .await?
            .address;
        info!("Factory {} administered by {}", factory, parties.admin.address());

        Ok(Self {
            orchestrator,
            mirror,
            asset,
            factory,
            parties,
        })
    }

    fn ctx<'a>(&self, signer: &'a LocalSigner) -> OperationContext<'a> {
        OperationContext::new(signer).with_observer(&LogObserver)
    }

    async fn deploy(
        &self,
        amount: Amount,
        job_id: &str,
        oracle_kinds: Vec<OracleKind>,
    ) -> anyhow::Result<Address> {
        let request = DeployRequest {
            worker: self.parties.worker.address(),
            mediator: None,
            amount,
            job_id: job_id.to_string(),
            oracle_kinds,
        };
        let deployed = self
            .orchestrator
            .deploy_escrow(&self.ctx(&self.parties.employer), self.factory, request)
            .await?;

        let record = DeploymentRecord {
            job_id: job_id.to_string(),
            escrow: deployed.escrow,
            factory: self.factory,
            employer: self.parties.employer.address(),
            worker: self.parties.worker.address(),
            amount,
            transaction_id: deployed.outcome.transaction_id,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.mirror.record_deployment(&record).await {
            warn!("Could not mirror deployment of {}: {}", deployed.escrow, e);
        }
        Ok(deployed.escrow)
    }

    async fn record_payment(
        &self,
        escrow: Address,
        job_id: &str,
        kind: PaymentKind,
        payee: Address,
        amount: Amount,
        outcome: &OperationOutcome,
    ) {
        let record = PaymentRecord {
            job_id: job_id.to_string(),
            escrow,
            kind,
            payee,
            amount,
            transaction_id: outcome.transaction_id,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.mirror.record_payment(&record).await {
            warn!("Could not mirror payment from {}: {}", escrow, e);
        }
    }

    async fn balance(&self, owner: &LocalSigner) -> anyhow::Result<Amount> {
        Ok(self
            .orchestrator
            .asset_balance(self.asset, owner.address())
            .await?)
    }
}

pub async fn run(flow: Flow, chain_id: u64, config: OrchestratorConfig) -> anyhow::Result<()> {
    let session = Session::open(chain_id, config).await?;
    let report = match flow {
        Flow::Pay => pay(&session).await?,
        Flow::Oracle => oracle(&session).await?,
        Flow::Dispute => dispute(&session).await?,
        Flow::Batch => batch(&session).await?,
        Flow::TopUp => top_up(&session).await?,
        Flow::Recover => recover(&session).await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn pay(session: &Session) -> anyhow::Result<serde_json::Value> {
    let escrow = session.deploy(1_000, "job-pay", vec![]).await?;
    let outcome = session
        .orchestrator
        .approve_and_pay(&session.ctx(&session.parties.employer), escrow)
        .await?;
    session
        .record_payment(
            escrow,
            "job-pay",
            PaymentKind::Release,
            session.parties.worker.address(),
            1_000,
            &outcome,
        )
        .await;

    let state = session.orchestrator.get_contract_state(escrow).await?;
    Ok(json!({
        "escrow": escrow,
        "state": state.details.state,
        "worker_balance": session.balance(&session.parties.worker).await?.to_string(),
        "transaction": outcome.explorer_link,
    }))
}

async fn oracle(session: &Session) -> anyhow::Result<serde_json::Value> {
    let admin = session.ctx(&session.parties.admin);
    let oracle = session
        .orchestrator
        .deploy_oracle(&admin, Deployment::ManualOracle)
        .await?
        .address;
    session
        .orchestrator
        .register_oracle(&admin, session.factory, oracle)
        .await?;

    let escrow = session
        .deploy(500, "job-oracle", vec![OracleKind::Manual])
        .await?;
    let employer = session.ctx(&session.parties.employer);

    let premature = session
        .orchestrator
        .send_operation(&employer, Call::escrow(escrow, EscrowCall::ApproveAndPay))
        .await
        .err()
        .context("payment went through before the oracle verified")?;
    info!("Payment before verification refused: {}", premature);

    let outcome = session.orchestrator.approve_and_pay(&employer, escrow).await?;
    Ok(json!({
        "escrow": escrow,
        "oracle": oracle,
        "refused_before_verification": premature.message,
        "events_in_payment": outcome.receipt.logs.len(),
        "worker_balance": session.balance(&session.parties.worker).await?.to_string(),
    }))
}

async fn dispute(session: &Session) -> anyhow::Result<serde_json::Value> {
    let escrow = session.deploy(1_001, "job-dispute", vec![]).await?;
    let mediator = session.parties.mediator.address();

    session
        .orchestrator
        .raise_dispute(
            &session.ctx(&session.parties.worker),
            escrow,
            "Deliverable incomplete",
        )
        .await?;
    session
        .orchestrator
        .assign_mediator(&session.ctx(&session.parties.admin), escrow, mediator)
        .await?;

    let permissions = session
        .orchestrator
        .check_permissions(escrow, mediator)
        .await?;
    let before = session.balance(&session.parties.employer).await?;
    let outcome = session
        .orchestrator
        .resolve_dispute(&session.ctx(&session.parties.mediator), escrow, 50)
        .await?;
    let worker_amount = session.balance(&session.parties.worker).await?;
    let employer_amount = session.balance(&session.parties.employer).await? - before;

    for (payee, kind, amount) in [
        (session.parties.worker.address(), PaymentKind::DisputeSplit, worker_amount),
        (session.parties.employer.address(), PaymentKind::Refund, employer_amount),
    ] {
        session
            .record_payment(escrow, "job-dispute", kind, payee, amount, &outcome)
            .await;
    }

    Ok(json!({
        "escrow": escrow,
        "mediator_could_resolve": permissions.can_resolve_dispute,
        "worker_amount": worker_amount.to_string(),
        "employer_amount": employer_amount.to_string(),
        "state": session.orchestrator.get_contract_state(escrow).await?.details.state,
    }))
}

async fn batch(session: &Session) -> anyhow::Result<serde_json::Value> {
    let requests: Vec<DeployRequest> = [("job-b1", 300), ("job-b2", 200), ("job-b3", 100)]
        .into_iter()
        .map(|(job_id, amount)| DeployRequest {
            worker: session.parties.worker.address(),
            mediator: None,
            amount,
            job_id: job_id.to_string(),
            oracle_kinds: vec![],
        })
        .collect();

    let deployed = session
        .orchestrator
        .deploy_batch(&session.ctx(&session.parties.employer), session.factory, requests)
        .await?;
    let summary = session.orchestrator.factory_info(session.factory).await?;

    Ok(json!({
        "escrows": deployed.escrows,
        "total": deployed.total.to_string(),
        "factory_contracts": summary.total_contracts,
        "transaction": deployed.outcome.explorer_link,
    }))
}

async fn top_up(session: &Session) -> anyhow::Result<serde_json::Value> {
    let escrow = session.deploy(400, "job-top-up", vec![]).await?;
    let employer = session.ctx(&session.parties.employer);

    session.orchestrator.top_up(&employer, escrow, 150).await?;
    let funded = session.orchestrator.get_contract_state(escrow).await?;

    let outcome = session.orchestrator.cancel_contract(&employer, escrow).await?;
    session
        .record_payment(
            escrow,
            "job-top-up",
            PaymentKind::Refund,
            session.parties.employer.address(),
            funded.balance,
            &outcome,
        )
        .await;

    Ok(json!({
        "escrow": escrow,
        "payment_amount_after_top_up": funded.details.payment_amount.to_string(),
        "refunded": funded.balance.to_string(),
        "employer_balance": session.balance(&session.parties.employer).await?.to_string(),
        "state": session.orchestrator.get_contract_state(escrow).await?.details.state,
    }))
}

async fn recover(session: &Session) -> anyhow::Result<serde_json::Value> {
    let mut registry = AdminRegistry::new(
        session.orchestrator.clone(),
        FactoryConfig {
            factory: session.factory,
            asset: session.asset,
        },
    );
    let replacement_admin = LocalSigner::from_seed("demo-replacement-admin")?;
    let previous = registry.factory_config();

    // Anyone can provision; the admin of the new factory is the candidate
    let provisioned = registry
        .provision_new_factory(
            &session.ctx(&session.parties.employer),
            replacement_admin.address(),
        )
        .await?;
    let admin = registry.current_admin().await;

    registry
        .transfer_admin(&session.ctx(&replacement_admin), session.parties.admin.address())
        .await?;

    Ok(json!({
        "previous_factory": previous.factory,
        "new_factory": provisioned.factory,
        "admin_after_provisioning": admin,
        "admin_after_rotation": registry.current_admin().await,
        "explorer": session.orchestrator.explorer().address(&provisioned.factory),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_flow_runs() {
        for flow in [
            Flow::Pay,
            Flow::Oracle,
            Flow::Dispute,
            Flow::Batch,
            Flow::TopUp,
            Flow::Recover,
        ] {
            let session = Session::open(84532, OrchestratorConfig::default())
                .await
                .unwrap();
            let report = match flow {
                Flow::Pay => pay(&session).await,
                Flow::Oracle => oracle(&session).await,
                Flow::Dispute => dispute(&session).await,
                Flow::Batch => batch(&session).await,
                Flow::TopUp => top_up(&session).await,
                Flow::Recover => recover(&session).await,
            };
            assert!(report.is_ok(), "{:?} failed: {:?}", flow, report.err());
        }
    }

    #[tokio::test]
    async fn test_dispute_split_rounds_down_for_worker() {
        let session = Session::open(84532, OrchestratorConfig::default())
            .await
            .unwrap();
        let report = dispute(&session).await.unwrap();
        assert_eq!(report["worker_amount"], "500");
        assert_eq!(report["employer_amount"], "501");
    }
}
