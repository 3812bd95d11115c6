//! Idempotency-key derivation and duplicate-mutation detection.
//!
//! Recognition of an already-applied mutation is enforced by the unique
//! index on `boost_changes.idem_key`, never by a process-local cache, so
//! retries are detected correctly across independent process instances
//! hitting the same database.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::LedgerError;
use crate::models::WalletAddress;

const KEY_DOMAIN: &[u8] = b"arena.boost.increase.v1";

/// 32-byte idempotency key for a boost mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyKey([u8; 32]);

impl IdempotencyKey {
    /// Derive the default key for a boost increase.
    ///
    /// Deterministic over (user, competition, wallet, amount): a client
    /// retry of the same logical mutation produces the same key. The
    /// amount is normalized first so `100` and `100.0` hash identically.
    pub fn derive(
        user_id: Uuid,
        competition_id: Uuid,
        wallet: &WalletAddress,
        amount: &BigDecimal,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(user_id.as_bytes());
        hasher.update(competition_id.as_bytes());
        hasher.update(wallet.as_bytes());
        hasher.update(amount.normalized().to_string().as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LedgerError> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LedgerError::Validation("Idempotency key must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, LedgerError> {
        let raw = hex::decode(s)
            .map_err(|_| LedgerError::Validation(format!("Malformed idempotency key: {}", s)))?;
        Self::from_slice(&raw)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for IdempotencyKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for IdempotencyKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        IdempotencyKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// True when the error is a storage-level uniqueness conflict, e.g. a
/// duplicate idempotency key that lost a race.
pub fn is_unique_violation(err: &LedgerError) -> bool {
    matches!(err, LedgerError::Constraint { code, .. } if code == "23505")
}

/// True when the error is a foreign-key failure from an invalid caller
/// reference (nonexistent agent, user or competition).
pub fn is_foreign_key_violation(err: &LedgerError) -> bool {
    matches!(err, LedgerError::Constraint { code, .. } if code == "23503")
}
