//! Operations - ordered call lists submitted as one unit
//!
//! An operation is signed over the SHA-256 digest of its canonical JSON
//! encoding. The ledger recovers the sender from the attached public key.

use crate::factory::{BatchDeployRequest, DeployRequest};
use crate::oracle::OracleKind;
use crate::types::{sha256_digest, Address, Amount, TxHash};
use crate::{LedgerError, LedgerResult};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenCall {
    Approve { spender: Address, amount: Amount },
    Transfer { to: Address, amount: Amount },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowCall {
    ApproveAndPay,
    RaiseDispute { reason: String },
    ResolveDispute { worker_percent: u8 },
    CancelContract,
    TopUp { amount: Amount },
    AssignMediator { mediator: Address },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactoryCall {
    RegisterOracle { oracle: Address },
    RemoveOracle { kind: OracleKind },
    TransferAdmin { new_admin: Address },
    DeployContract(DeployRequest),
    DeployBatch(BatchDeployRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleCall {
    Verify { target: Address },
}

/// Object created by a call to the zero address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Deployment {
    EscrowFactory { admin: Address, asset: Address },
    ManualOracle,
    QuorumOracle { attestors: Vec<Address>, threshold: u32 },
}

/// Call payload, one variant per object type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallData {
    Token(TokenCall),
    Escrow(EscrowCall),
    Factory(FactoryCall),
    Oracle(OracleCall),
    Create(Deployment),
}

/// One call inside an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub target: Address,
    pub payload: CallData,
    pub value: Amount,
}

impl Call {
    pub fn new(target: Address, payload: CallData) -> Self {
        Self {
            target,
            payload,
            value: 0,
        }
    }

    pub fn token(asset: Address, call: TokenCall) -> Self {
        Self::new(asset, CallData::Token(call))
    }

    pub fn escrow(escrow: Address, call: EscrowCall) -> Self {
        Self::new(escrow, CallData::Escrow(call))
    }

    pub fn factory(factory: Address, call: FactoryCall) -> Self {
        Self::new(factory, CallData::Factory(call))
    }

    pub fn oracle(oracle: Address, call: OracleCall) -> Self {
        Self::new(oracle, CallData::Oracle(call))
    }

    pub fn create(deployment: Deployment) -> Self {
        Self::new(Address::ZERO, CallData::Create(deployment))
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match &self.payload {
            CallData::Token(TokenCall::Approve { .. }) => "approve",
            CallData::Token(TokenCall::Transfer { .. }) => "transfer",
            CallData::Escrow(EscrowCall::ApproveAndPay) => "approveAndPay",
            CallData::Escrow(EscrowCall::RaiseDispute { .. }) => "raiseDispute",
            CallData::Escrow(EscrowCall::ResolveDispute { .. }) => "resolveDispute",
            CallData::Escrow(EscrowCall::CancelContract) => "cancelContract",
            CallData::Escrow(EscrowCall::TopUp { .. }) => "topUp",
            CallData::Escrow(EscrowCall::AssignMediator { .. }) => "assignMediator",
            CallData::Factory(FactoryCall::RegisterOracle { .. }) => "registerOracle",
            CallData::Factory(FactoryCall::RemoveOracle { .. }) => "removeOracle",
            CallData::Factory(FactoryCall::TransferAdmin { .. }) => "transferAdmin",
            CallData::Factory(FactoryCall::DeployContract(_)) => "deployContract",
            CallData::Factory(FactoryCall::DeployBatch(_)) => "deployBatch",
            CallData::Oracle(OracleCall::Verify { .. }) => "verify",
            CallData::Create(_) => "create",
        }
    }
}

/// Operation before signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedOperation {
    pub chain_id: u64,
    pub from: Address,
    pub nonce: u64,
    pub calls: Vec<Call>,
}

impl UnsignedOperation {
    /// Digest that gets signed
    pub fn digest(&self) -> LedgerResult<[u8; 32]> {
        let encoded = serde_json::to_vec(self)?;
        Ok(sha256_digest(&encoded))
    }

    pub fn sign(self, secret_key: &SecretKey) -> LedgerResult<SignedOperation> {
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::from_secret_key(&secp, secret_key);
        if Address::from_public_key(&public_key) != self.from {
            return Err(LedgerError::InvalidSignature(
                "signing key does not control the sender address".to_string(),
            ));
        }

        let message = Message::from_digest(self.digest()?);
        let signature = secp.sign_ecdsa(&message, secret_key);
        Ok(SignedOperation {
            operation: self,
            public_key: public_key.serialize().to_vec(),
            signature: signature.serialize_compact().to_vec(),
        })
    }
}

/// Operation with the sender's compressed public key and compact signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOperation {
    pub operation: UnsignedOperation,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedOperation {
    /// Check that the signature is valid and was made by the sender
    pub fn verify(&self) -> LedgerResult<()> {
        let public_key = PublicKey::from_slice(&self.public_key)
            .map_err(|e| LedgerError::InvalidSignature(e.to_string()))?;
        if Address::from_public_key(&public_key) != self.operation.from {
            return Err(LedgerError::InvalidSignature(
                "public key does not match sender".to_string(),
            ));
        }
        let signature = Signature::from_compact(&self.signature)
            .map_err(|e| LedgerError::InvalidSignature(e.to_string()))?;
        let message = Message::from_digest(self.operation.digest()?);
        Secp256k1::verification_only()
            .verify_ecdsa(&message, &signature, &public_key)
            .map_err(|e| LedgerError::InvalidSignature(e.to_string()))
    }

    pub fn transaction_id(&self) -> LedgerResult<TxHash> {
        let encoded = serde_json::to_vec(self)?;
        Ok(TxHash::from_digest(sha256_digest(&encoded)))
    }
}
