//! Block explorer links

use escrow_ledger::{Address, TxHash};

/// Formats `{base}/tx/{id}` and `{base}/address/{addr}` links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerLinks {
    base_url: String,
}

impl ExplorerLinks {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn transaction(&self, transaction_id: &TxHash) -> String {
        format!("{}/tx/{}", self.base_url, transaction_id)
    }

    pub fn address(&self, address: &Address) -> String {
        format!("{}/address/{}", self.base_url, address)
    }
}
