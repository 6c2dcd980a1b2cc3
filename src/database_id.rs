//! Typed aliases for SQLite row ids.
//!
//! These are plain `i64` aliases rather than newtypes so they can be bound
//! directly as SQL parameters, but giving each aggregate its own alias keeps
//! function signatures readable.

/// The id of a row in the user table.
pub type UserId = i64;

/// The id of a row in the category table.
pub type CategoryId = i64;

/// The id of a row in the payment mode table.
pub type PaymentModeId = i64;

/// The id of a row in the bank account table.
pub type BankAccountId = i64;

/// The id of a row in the transaction table.
pub type TransactionId = i64;
