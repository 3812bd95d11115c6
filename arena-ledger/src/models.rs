use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::LedgerError;
use crate::idempotency::IdempotencyKey;

// ===== TRADING BALANCES =====

/// One (agent, token, competition) balance row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Balance {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub token_address: String,
    pub competition_id: Uuid,
    pub amount: Decimal,
    pub specific_chain: String,
    pub symbol: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Replacement value for one token in a full balance reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    pub amount: Decimal,
    pub symbol: String,
    pub specific_chain: String,
}

// ===== BOOST LEDGER =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BoostBalance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub competition_id: Uuid,
    pub balance: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only change-log entry. Never updated, never individually
/// deleted; removed only when the owning balance row cascades away.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BoostChange {
    pub id: Uuid,
    pub balance_id: Uuid,
    pub delta_amount: BigDecimal,
    pub wallet: Vec<u8>,
    pub idem_key: Vec<u8>,
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Arguments for `BoostLedger::increase`.
#[derive(Debug, Clone)]
pub struct IncreaseBoost {
    pub user_id: Uuid,
    pub competition_id: Uuid,
    pub wallet: WalletAddress,
    pub amount: BigDecimal,
    pub idem_key: Option<IdempotencyKey>,
    pub meta: Option<serde_json::Value>,
}

/// Outcome of an idempotent boost increase. Callers must branch on
/// the variant: `Applied` means this call performed the mutation,
/// `Noop` means an equivalent mutation was already recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BoostIncrease {
    Applied {
        balance_after: BigDecimal,
        change_id: Uuid,
        idem_key: IdempotencyKey,
    },
    Noop {
        balance: BigDecimal,
    },
}

// ===== BOOST BONUSES =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BoostBonus {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_by_admin_id: Option<Uuid>,
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBoostBonus {
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub expires_at: DateTime<Utc>,
    pub created_by_admin_id: Option<Uuid>,
    pub meta: Option<serde_json::Value>,
}

/// Partial update for a boost bonus. `amount` is immutable after
/// creation and deliberately has no field here.
#[derive(Debug, Clone, Default)]
pub struct BoostBonusUpdate {
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub meta: Option<serde_json::Value>,
}

// ===== WALLET ADDRESS =====

/// 20-byte EVM wallet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalletAddress([u8; 20]);

impl WalletAddress {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, LedgerError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(stripped)
            .map_err(|_| LedgerError::Validation(format!("Malformed wallet address: {}", s)))?;
        let bytes: [u8; 20] = raw.try_into().map_err(|_| {
            LedgerError::Validation(format!("Wallet address must be 20 bytes: {}", s))
        })?;
        Ok(Self(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LedgerError> {
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| LedgerError::Validation("Wallet address must be 20 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        WalletAddress::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
