use crate::error::LedgerError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Number of fraction digits kept for every stored amount and balance.
pub const MONEY_SCALE: u32 = 2;

/// Rounds a decimal to the ledger's fixed-point precision.
pub fn quantize(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Externally supplied account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Represents a monetary value with 2 decimal places precision.
///
/// A balance is allowed to go negative: debits applied by the consumer are not
/// floored, so the non-negative rule is only checked at admission time.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

/// Represents a positive monetary amount submitted by a client.
///
/// Keeps the amount as requested alongside its cent-rounded form: funds are
/// checked against the former, the latter is what gets recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Amount {
    requested: Decimal,
    recorded: Decimal,
}

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value <= Decimal::ZERO {
            return Err(LedgerError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        let recorded = quantize(value);
        if recorded.is_zero() {
            return Err(LedgerError::ValidationError(format!(
                "Amount {value} rounds to zero at {MONEY_SCALE} decimal places"
            )));
        }
        Ok(Self {
            requested: value,
            recorded,
        })
    }

    /// The amount exactly as submitted.
    pub fn requested(&self) -> Decimal {
        self.requested
    }

    /// The amount rounded to the ledger's precision.
    pub fn value(&self) -> Decimal {
        self.recorded
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(quantize(amount))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Whether this balance covers `amount` (`balance >= amount`).
    pub fn covers(&self, amount: Decimal) -> bool {
        self.0 >= amount
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// A named account and its current balance.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub id: AccountId,
    pub balance: Balance,
}

impl Account {
    /// Lazily created accounts always start at zero.
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            balance: Balance::new(Decimal::ZERO),
        }
    }

    /// Credits the balance.
    pub fn deposit(&mut self, amount: Decimal) {
        self.balance += Balance::new(amount);
    }

    /// Debits the balance with no floor; the result may be negative.
    pub fn debit(&mut self, amount: Decimal) {
        self.balance -= Balance::new(amount);
    }
}
