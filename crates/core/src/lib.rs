//! `loyalty-core`: domain building blocks for the loyalty ledger.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, Luhn-validated order numbers, orders and their scoring
//! lifecycle, withdrawals and the derived balance.

pub mod balance;
pub mod error;
pub mod id;
pub mod number;
pub mod order;
pub mod withdrawal;

pub use balance::Balance;
pub use error::{DomainError, DomainResult};
pub use id::UserId;
pub use number::{luhn_valid, OrderNumber};
pub use order::{Order, OrderOutcome, OrderStatus};
pub use withdrawal::Withdrawal;
