//! Ledger client seam
//!
//! The orchestrator talks to the ledger only through [`LedgerClient`].
//! [`InProcessClient`] serves it from a [`SharedLedger`] in the same process.

use crate::error::ClientError;
use async_trait::async_trait;
use escrow_ledger::{
    Address, Amount, EscrowDetails, FactorySummary, LogEntry, OracleKind, Receipt, SharedLedger,
    SignedOperation, TxHash, UnsignedOperation,
};

/// Read and write access to a ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ClientError>;

    async fn nonce(&self, account: &Address) -> Result<u64, ClientError>;

    /// Dry-run an operation; reverts come back as [`ClientError::Reverted`]
    async fn simulate(&self, operation: &UnsignedOperation) -> Result<Vec<LogEntry>, ClientError>;

    async fn submit(&self, operation: SignedOperation) -> Result<TxHash, ClientError>;

    async fn wait_for_receipt(&self, transaction_id: &TxHash) -> Result<Receipt, ClientError>;

    async fn escrow_details(&self, escrow: &Address) -> Result<EscrowDetails, ClientError>;

    async fn escrow_balance(&self, escrow: &Address) -> Result<Amount, ClientError>;

    async fn check_oracles(&self, escrow: &Address) -> Result<bool, ClientError>;

    async fn is_work_verified(&self, oracle: &Address, target: &Address) -> Result<bool, ClientError>;

    async fn oracle_kind(&self, oracle: &Address) -> Result<OracleKind, ClientError>;

    async fn factory_summary(&self, factory: &Address) -> Result<FactorySummary, ClientError>;

    async fn asset_balance(&self, asset: &Address, owner: &Address) -> Result<Amount, ClientError>;

    async fn allowance(
        &self,
        asset: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, ClientError>;
}

/// Client for a ledger living in this process
#[derive(Clone)]
pub struct InProcessClient {
    ledger: SharedLedger,
}

impl InProcessClient {
    pub fn new(ledger: SharedLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }
}

#[async_trait]
impl LedgerClient for InProcessClient {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        Ok(self.ledger.read().await.chain_id())
    }

    async fn nonce(&self, account: &Address) -> Result<u64, ClientError> {
        Ok(self.ledger.read().await.nonce(account))
    }

    async fn simulate(&self, operation: &UnsignedOperation) -> Result<Vec<LogEntry>, ClientError> {
        Ok(self.ledger.read().await.simulate(operation)?)
    }

    async fn submit(&self, operation: SignedOperation) -> Result<TxHash, ClientError> {
        Ok(self.ledger.write().await.submit(operation)?)
    }

    // Blocks are produced on submission, so the receipt is already there
    async fn wait_for_receipt(&self, transaction_id: &TxHash) -> Result<Receipt, ClientError> {
        Ok(self.ledger.read().await.receipt(transaction_id)?.clone())
    }

    async fn escrow_details(&self, escrow: &Address) -> Result<EscrowDetails, ClientError> {
        Ok(self.ledger.read().await.escrow_details(escrow)?)
    }

    async fn escrow_balance(&self, escrow: &Address) -> Result<Amount, ClientError> {
        Ok(self.ledger.read().await.escrow_balance(escrow)?)
    }

    async fn check_oracles(&self, escrow: &Address) -> Result<bool, ClientError> {
        Ok(self.ledger.read().await.check_oracles(escrow)?)
    }

    async fn is_work_verified(&self, oracle: &Address, target: &Address) -> Result<bool, ClientError> {
        Ok(self.ledger.read().await.is_work_verified(oracle, target)?)
    }

    async fn oracle_kind(&self, oracle: &Address) -> Result<OracleKind, ClientError> {
        Ok(self.ledger.read().await.oracle_kind(oracle)?)
    }

    async fn factory_summary(&self, factory: &Address) -> Result<FactorySummary, ClientError> {
        Ok(self.ledger.read().await.factory_summary(factory)?)
    }

    async fn asset_balance(&self, asset: &Address, owner: &Address) -> Result<Amount, ClientError> {
        Ok(self.ledger.read().await.asset_balance(asset, owner)?)
    }

    async fn allowance(
        &self,
        asset: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, ClientError> {
        Ok(self.ledger.read().await.allowance(asset, owner, spender)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_ledger::Ledger;

    #[tokio::test]
    async fn test_reads_through_shared_ledger() {
        let mut ledger = Ledger::new(7);
        let asset = ledger.create_asset("USDC");
        let owner = Address::derive(&Address::ZERO, 99);
        ledger.mint(&asset, owner, 250).unwrap();
        let client = InProcessClient::new(ledger.shared());

        assert_eq!(client.chain_id().await.unwrap(), 7);
        assert_eq!(client.asset_balance(&asset, &owner).await.unwrap(), 250);
        assert_eq!(client.nonce(&owner).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_object_is_rpc_error() {
        let client = InProcessClient::new(Ledger::new(7).shared());
        let err = client
            .escrow_details(&Address::derive(&Address::ZERO, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rpc { code: -32602, .. }));
    }
}
