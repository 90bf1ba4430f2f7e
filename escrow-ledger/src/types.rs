//! Primitive ledger types
//!
//! Addresses and transaction ids are fixed-size byte strings rendered as
//! `0x`-prefixed lowercase hex, both in `Display` and in serialized form.

use secp256k1::hashes::{sha256, Hash};
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Asset amount in the asset's smallest unit
pub type Amount = u128;

/// External correlation key linking an escrow to an off-ledger job posting
pub type JobId = String;

/// SHA-256 of `data`
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(data).to_byte_array()
}

/// Hex identifier parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("expected {expected} hex characters, got {got}")]
    Length { expected: usize, got: usize },

    #[error("invalid hex digit in {0:?}")]
    Hex(String),
}

fn decode_hex<const N: usize>(input: &str) -> Result<[u8; N], ParseIdError> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    if digits.len() != N * 2 {
        return Err(ParseIdError::Length {
            expected: N * 2,
            got: digits.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out).map_err(|_| ParseIdError::Hex(input.to_string()))?;
    Ok(out)
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    write!(f, "0x{}", hex::encode(bytes))
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; $len]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_hex(f, &self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_hex(f, &self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_hex::<$len>(s).map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }
    };
}

hex_id!(
    /// 20-byte account or object address
    Address,
    20
);

hex_id!(
    /// 32-byte transaction id
    TxHash,
    32
);

impl Address {
    /// Reserved address; target of creation calls, never an account
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Account address controlled by a secp256k1 key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self::from_digest(&sha256_digest(&public_key.serialize()))
    }

    /// Address of the object created by `deployer` with its `nonce`-th creation
    pub fn derive(deployer: &Address, nonce: u64) -> Self {
        let mut preimage = Vec::with_capacity(28);
        preimage.extend_from_slice(&deployer.0);
        preimage.extend_from_slice(&nonce.to_be_bytes());
        Self::from_digest(&sha256_digest(&preimage))
    }

    fn from_digest(digest: &[u8; 32]) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }
}

impl TxHash {
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trips_through_text() {
        let address = Address::derive(&Address::ZERO, 7);
        let text = address.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 42);
        assert_eq!(text.parse::<Address>().unwrap(), address);

        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", text));
    }

    #[test]
    fn test_derive_depends_on_deployer_and_nonce() {
        let deployer = Address::derive(&Address::ZERO, 1);
        assert_ne!(Address::derive(&deployer, 0), Address::derive(&deployer, 1));
        assert_ne!(
            Address::derive(&deployer, 0),
            Address::derive(&Address::ZERO, 0)
        );
        assert_eq!(Address::derive(&deployer, 3), Address::derive(&deployer, 3));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "0x1234".parse::<Address>(),
            Err(ParseIdError::Length { expected: 40, got: 4 })
        ));
        let bad = format!("0x{}", "zz".repeat(20));
        assert!(matches!(bad.parse::<Address>(), Err(ParseIdError::Hex(_))));
    }

    #[test]
    fn test_parse_accepts_upper_case_and_bare_hex() {
        let address = Address::derive(&Address::ZERO, 9);
        let bare = hex::encode(address.as_bytes());
        assert_eq!(bare.parse::<Address>().unwrap(), address);
        assert_eq!(
            format!("0X{}", bare.to_uppercase()).parse::<Address>().unwrap(),
            address
        );
        assert_eq!(address.to_string(), format!("0x{}", bare));
    }
}
