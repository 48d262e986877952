//! Wire contract between the admission gateway and the transaction applier.
//!
//! Messages travel as JSON objects `{id, type, amount, account_id, timestamp}`
//! with the timestamp rendered as an ISO-8601 string.

use super::account::AccountId;
use super::transaction::{Transaction, TransactionId, TransactionType};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionMessage {
    pub id: TransactionId,
    pub r#type: TransactionType,
    pub amount: Decimal,
    pub account_id: AccountId,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
}

impl TransactionMessage {
    pub fn new(
        id: TransactionId,
        r#type: TransactionType,
        amount: Decimal,
        account_id: AccountId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            r#type,
            amount,
            account_id,
            timestamp,
        }
    }

    /// Serializes the message into the queue body.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a queue body. Any missing or ill-typed field is an error.
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn into_transaction(self) -> Transaction {
        Transaction::new(
            self.id,
            self.account_id,
            self.r#type,
            self.amount,
            self.timestamp,
        )
    }
}

/// ISO-8601 timestamps; offset-less values are read as UTC.
mod iso8601 {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
