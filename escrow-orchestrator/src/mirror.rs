//! Job mirror - off-ledger bookkeeping of deployed escrows and payments
//!
//! The mirror is a cache for the job board. Nothing in the ledger or the
//! orchestrator reads from it to decide anything.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use escrow_ledger::{Address, Amount, JobId, TxHash};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Escrow deployed for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Job posting the escrow pays for
    pub job_id: JobId,
    /// Escrow address
    pub escrow: Address,
    /// Factory that deployed it
    pub factory: Address,
    /// Funding account
    pub employer: Address,
    /// Account paid on approval
    pub worker: Address,
    /// Payment held
    pub amount: Amount,
    /// Deployment transaction
    pub transaction_id: TxHash,
    /// When the mirror entry was written
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentKind {
    Release,
    DisputeSplit,
    Refund,
    TopUp,
}

/// Payment-ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Job posting paid for
    pub job_id: JobId,
    /// Escrow the funds moved out of or into
    pub escrow: Address,
    /// Why the funds moved
    pub kind: PaymentKind,
    /// Receiving account
    pub payee: Address,
    /// Amount moved
    pub amount: Amount,
    /// Transaction that moved the funds
    pub transaction_id: TxHash,
    /// When the mirror entry was written
    pub recorded_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("HTTP error calling {endpoint}: {message}")]
    Http { endpoint: String, message: String },

    #[error("Mirror {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

#[async_trait]
pub trait JobMirror: Send + Sync {
    async fn record_deployment(&self, record: &DeploymentRecord) -> Result<(), MirrorError>;

    async fn find_contract(&self, job_id: &str) -> Result<Option<DeploymentRecord>, MirrorError>;

    async fn record_payment(&self, record: &PaymentRecord) -> Result<(), MirrorError>;
}

/// REST mirror
#[derive(Debug, Clone)]
pub struct HttpJobMirror {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobMirror {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MirrorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::Http {
                endpoint: base_url.to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<reqwest::Response, MirrorError> {
        request.send().await.map_err(|e| MirrorError::Http {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }

    async fn ensure_success(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<reqwest::Response, MirrorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(MirrorError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl JobMirror for HttpJobMirror {
    async fn record_deployment(&self, record: &DeploymentRecord) -> Result<(), MirrorError> {
        let endpoint = self.endpoint("contracts");
        debug!("POST {} for job {}", endpoint, record.job_id);
        let response = self
            .send(self.client.post(&endpoint).json(record), &endpoint)
            .await?;
        Self::ensure_success(response, &endpoint).await?;
        Ok(())
    }

    async fn find_contract(&self, job_id: &str) -> Result<Option<DeploymentRecord>, MirrorError> {
        let endpoint = self.endpoint("contracts");
        let response = self
            .send(
                self.client.get(&endpoint).query(&[("job_id", job_id)]),
                &endpoint,
            )
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::ensure_success(response, &endpoint).await?;
        response
            .json::<Option<DeploymentRecord>>()
            .await
            .map_err(|e| MirrorError::Decode {
                endpoint,
                message: e.to_string(),
            })
    }

    async fn record_payment(&self, record: &PaymentRecord) -> Result<(), MirrorError> {
        let endpoint = self.endpoint("payments");
        debug!("POST {} for job {}", endpoint, record.job_id);
        let response = self
            .send(self.client.post(&endpoint).json(record), &endpoint)
            .await?;
        Self::ensure_success(response, &endpoint).await?;
        Ok(())
    }
}

/// Mirror kept in memory
#[derive(Debug, Default)]
pub struct InMemoryMirror {
    deployments: RwLock<HashMap<JobId, DeploymentRecord>>,
    payments: RwLock<Vec<PaymentRecord>>,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.payments.read().await.clone()
    }
}

#[async_trait]
impl JobMirror for InMemoryMirror {
    async fn record_deployment(&self, record: &DeploymentRecord) -> Result<(), MirrorError> {
        self.deployments
            .write()
            .await
            .insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn find_contract(&self, job_id: &str) -> Result<Option<DeploymentRecord>, MirrorError> {
        Ok(self.deployments.read().await.get(job_id).cloned())
    }

    async fn record_payment(&self, record: &PaymentRecord) -> Result<(), MirrorError> {
        self.payments.write().await.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(job_id: &str) -> DeploymentRecord {
        DeploymentRecord {
            job_id: job_id.to_string(),
            escrow: Address::derive(&Address::ZERO, 1),
            factory: Address::derive(&Address::ZERO, 2),
            employer: Address::derive(&Address::ZERO, 3),
            worker: Address::derive(&Address::ZERO, 4),
            amount: 100,
            transaction_id: TxHash::from_digest([9u8; 32]),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_mirror() {
        let mirror = InMemoryMirror::new();
        let record = deployment("job-7");
        mirror.record_deployment(&record).await.unwrap();

        assert_eq!(mirror.find_contract("job-7").await.unwrap(), Some(record.clone()));
        assert_eq!(mirror.find_contract("job-8").await.unwrap(), None);

        mirror
            .record_payment(&PaymentRecord {
                job_id: record.job_id.clone(),
                escrow: record.escrow,
                kind: PaymentKind::Release,
                payee: record.worker,
                amount: 100,
                transaction_id: record.transaction_id,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(mirror.payments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_http_mirror_reports_unreachable_host() {
        let mirror = HttpJobMirror::new("http://127.0.0.1:9/", Duration::from_millis(200)).unwrap();
        assert_eq!(mirror.endpoint("contracts"), "http://127.0.0.1:9/contracts");
        let err = mirror.record_deployment(&deployment("job-1")).await.unwrap_err();
        assert!(matches!(err, MirrorError::Http { .. }));
    }
}
