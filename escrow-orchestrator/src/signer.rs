//! Operation signers
//!
//! A signer may block for as long as a human takes to approve, or refuse.
//! The orchestrator bounds the wait and treats a refusal as final.

use crate::error::SignerError;
use async_trait::async_trait;
use escrow_ledger::types::sha256_digest;
use escrow_ledger::{Address, SignedOperation, UnsignedOperation};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use tracing::debug;

/// Produces signatures for operations sent from one account
#[async_trait]
pub trait Signer: Send + Sync {
    /// Account whose key this signer holds
    fn address(&self) -> Address;

    async fn sign(&self, operation: UnsignedOperation) -> Result<SignedOperation, SignerError>;
}

/// Signs with a key held in memory
#[derive(Clone)]
pub struct LocalSigner {
    secret_key: SecretKey,
    address: Address,
}

impl LocalSigner {
    pub fn new(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret_key);
        Self {
            secret_key,
            address: Address::from_public_key(&public_key),
        }
    }

    /// Deterministic key derived from a passphrase, for demos and tests
    pub fn from_seed(seed: &str) -> Result<Self, SignerError> {
        let secret_key = SecretKey::from_slice(&sha256_digest(seed.as_bytes()))
            .map_err(|e| SignerError::Unavailable(format!("invalid key seed: {}", e)))?;
        Ok(Self::new(secret_key))
    }

    /// Fresh key from the thread-local CSPRNG
    pub fn random() -> Self {
        Self::new(SecretKey::new(&mut secp256k1::rand::thread_rng()))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, operation: UnsignedOperation) -> Result<SignedOperation, SignerError> {
        debug!(
            "Signing operation from {} with nonce {}",
            operation.from, operation.nonce
        );
        operation
            .sign(&self.secret_key)
            .map_err(|e| SignerError::Unavailable(e.to_string()))
    }
}
