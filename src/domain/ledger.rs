//! Shapes exchanged with the external settlement ledger.

use crate::error::{EngineError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain tag prepended to a payment before it is hashed or signed.
const SIGNING_TAG: &[u8] = b"TX";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum TxType {
    #[serde(rename = "pay")]
    Payment,
    #[serde(rename = "axfer")]
    AssetTransfer,
    #[serde(rename = "keyreg")]
    KeyRegistration,
    #[serde(rename = "appl")]
    ApplicationCall,
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Payment => "pay",
            Self::AssetTransfer => "axfer",
            Self::KeyRegistration => "keyreg",
            Self::ApplicationCall => "appl",
        };
        f.write_str(s)
    }
}

/// A transaction as indexed by the ledger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerTransaction {
    pub id: String,
    pub tx_type: TxType,
    pub sender: String,
    pub receiver: Option<String>,
    pub amount_minor: u64,
    pub confirmed_round: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub struct Confirmation {
    pub confirmed_round: u64,
}

/// An unsigned payment, valid between `first_valid` and `last_valid` rounds.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentTransaction {
    pub sender: String,
    pub receiver: String,
    pub amount_minor: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub note: String,
}

impl PaymentTransaction {
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = SIGNING_TAG.to_vec();
        bytes.extend(serde_json::to_vec(self)?);
        Ok(bytes)
    }

    /// Identifier the ledger assigns: hex SHA-256 of the signing bytes.
    pub fn tx_id(&self) -> Result<String> {
        let digest = Sha256::digest(self.signing_bytes()?);
        Ok(hex::encode_upper(digest))
    }

    pub fn sign(self, key: &SigningKey) -> Result<SignedTransaction> {
        let signature = key.sign(&self.signing_bytes()?);
        Ok(SignedTransaction {
            txn: self,
            signature: hex::encode(signature.to_bytes()),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SignedTransaction {
    pub txn: PaymentTransaction,
    pub signature: String,
}

impl SignedTransaction {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Checks the signature against the sender address.
    pub fn verify(&self) -> Result<()> {
        let key = verifying_key(&self.txn.sender)?;
        let raw = hex::decode(&self.signature)
            .map_err(|e| EngineError::Ledger(format!("Malformed signature: {e}")))?;
        let raw: [u8; 64] = raw
            .try_into()
            .map_err(|_| EngineError::Ledger("Signature must be 64 bytes".to_string()))?;
        key.verify(&self.txn.signing_bytes()?, &Signature::from_bytes(&raw))
            .map_err(|_| EngineError::Ledger("Signature does not match sender".to_string()))
    }
}

/// Ledger address of a public key: its upper-case hex encoding.
pub fn address_of(key: &VerifyingKey) -> String {
    hex::encode_upper(key.to_bytes())
}

pub fn verifying_key(address: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(address)
        .map_err(|e| EngineError::Ledger(format!("Malformed address {address}: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| EngineError::Ledger(format!("Address {address} is not 32 bytes")))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| EngineError::Ledger(format!("Address {address} is not a valid key: {e}")))
}

/// Ledger addresses compare case-insensitively.
pub fn same_address(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
