//! Order numbers and the Luhn checksum that guards them.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Returns `true` when `digits` is a non-empty ASCII digit string whose Luhn
/// checksum is valid.
///
/// Every second digit counting from the rightmost one is doubled (subtracting
/// 9 when the product exceeds 9); the total must be divisible by 10.
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    let mut double = false;
    for b in digits.bytes().rev() {
        if !b.is_ascii_digit() {
            return false;
        }
        let mut d = u32::from(b - b'0');
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }

    sum % 10 == 0
}

/// A validated order number: decimal digits passing the Luhn checksum.
///
/// Used both for accrual orders and as the transaction id of withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Parse and validate an order number.
    ///
    /// Surrounding whitespace is ignored. Non-digit input is a
    /// [`DomainError::Validation`]; a digit string with a bad checksum is a
    /// [`DomainError::InvalidOrderNumber`].
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let digits = raw.trim();
        if digits.is_empty() {
            return Err(DomainError::validation("order number is empty"));
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "order number must contain only decimal digits, got {digits:?}"
            )));
        }
        if !luhn_valid(digits) {
            return Err(DomainError::invalid_order_number(digits));
        }
        Ok(Self(digits.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl FromStr for OrderNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderNumber> for String {
    fn from(value: OrderNumber) -> Self {
        value.0
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
