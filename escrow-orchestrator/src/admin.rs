//! Admin Registry - which factory is in use and who administers it
//!
//! The registry is an owned value handed to whoever needs it. Rotating the
//! admin is an explicit signed operation; if the admin key is lost, a
//! replacement factory is provisioned for a new admin and becomes current.

use crate::orchestrator::{OperationContext, OperationOutcome, TransactionOrchestrator};
use crate::OperationResult;
use escrow_ledger::{Address, Deployment};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Factory currently used for new escrows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Factory new escrows are deployed through
    pub factory: Address,
    /// Asset escrows are funded in
    pub asset: Address,
}

pub struct AdminRegistry {
    orchestrator: Arc<TransactionOrchestrator>,
    config: FactoryConfig,
}

impl AdminRegistry {
    pub fn new(orchestrator: Arc<TransactionOrchestrator>, config: FactoryConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn factory_config(&self) -> FactoryConfig {
        self.config
    }

    /// Current admin of the factory, or `None` if it cannot be read
    pub async fn current_admin(&self) -> Option<Address> {
        match self.orchestrator.factory_info(self.config.factory).await {
            Ok(summary) => Some(summary.admin),
            Err(failure) => {
                warn!(
                    "Could not read admin of factory {}: {}",
                    self.config.factory, failure
                );
                None
            }
        }
    }

    pub async fn is_current_admin(&self, candidate: &Address) -> bool {
        self.current_admin().await.as_ref() == Some(candidate)
    }

    /// Hand the current factory to `new_admin`; must be signed by the current admin
    pub async fn transfer_admin(
        &self,
        ctx: &OperationContext<'_>,
        new_admin: Address,
    ) -> OperationResult<OperationOutcome> {
        let outcome = self
            .orchestrator
            .transfer_admin(ctx, self.config.factory, new_admin)
            .await?;
        info!(
            "Admin of factory {} transferred to {}",
            self.config.factory, new_admin
        );
        Ok(outcome)
    }

    /// Create a replacement factory administered by `admin_candidate` and switch to it.
    ///
    /// The new factory starts with an empty oracle registry; its admin has to
    /// register oracles again.
    pub async fn provision_new_factory(
        &mut self,
        ctx: &OperationContext<'_>,
        admin_candidate: Address,
    ) -> OperationResult<FactoryConfig> {
        let previous = self.config.factory;
        let created = self
            .orchestrator
            .create_object(
                ctx,
                Deployment::EscrowFactory {
                    admin: admin_candidate,
                    asset: self.config.asset,
                },
            )
            .await?;

        self.config.factory = created.address;
        info!(
            "Provisioned factory {} for admin {} (replaces {})",
            created.address, admin_candidate, previous
        );
        Ok(self.config)
    }
}
