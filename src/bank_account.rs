//! Bank accounts: the authoritative balance store for bank-linked payment
//! modes.
//!
//! Several payment modes may point at the same bank account (for example a
//! debit card and an online banking mode), so the account's balance reflects
//! the combined effect of transactions routed through any of them. The
//! transaction engine never writes a bank account balance directly; it goes
//! through [crate::payment_mode::apply_payment_mode_delta], which dispatches
//! here when the mode is bank-linked.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    auth::AuthenticatedUser,
    database_id::{BankAccountId, UserId},
};

// ============================================================================
// MODELS
// ============================================================================

/// An account held at a bank, with the balance the app believes it has.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankAccount {
    /// The ID of the bank account.
    pub id: BankAccountId,
    /// The ID of the user that owns the bank account.
    pub user_id: UserId,
    /// The display name of the bank account.
    pub name: String,
    /// The current balance of the bank account.
    pub balance: f64,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the bank account table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_bank_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS bank_account (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                balance REAL NOT NULL DEFAULT 0,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Create a new bank account for `user_id`.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn create_bank_account(
    user_id: UserId,
    name: &str,
    balance: f64,
    connection: &Connection,
) -> Result<BankAccount, Error> {
    connection.execute(
        "INSERT INTO bank_account (user_id, name, balance) VALUES (?1, ?2, ?3)",
        (user_id, name, balance),
    )?;

    Ok(BankAccount {
        id: connection.last_insert_rowid(),
        user_id,
        name: name.to_owned(),
        balance,
    })
}

/// Retrieve all bank accounts owned by `user_id`.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_bank_accounts(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<BankAccount>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, balance FROM bank_account
             WHERE user_id = :user_id",
        )?
        .query_map(&[(":user_id", &user_id)], map_bank_account_row)?
        .map(|account_result| account_result.map_err(Error::SqlError))
        .collect()
}

/// Load the bank account `bank_account_id` owned by `user_id`.
///
/// An account that exists but belongs to another user is reported the same
/// way as one that does not exist.
///
/// # Errors
/// This function will return a:
/// - [Error::BankAccountNotFound] if there is no such account for this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn resolve_bank_account(
    bank_account_id: BankAccountId,
    user_id: UserId,
    connection: &Connection,
) -> Result<BankAccount, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, balance FROM bank_account
             WHERE id = :id AND user_id = :user_id",
        )?
        .query_row(
            &[(":id", &bank_account_id), (":user_id", &user_id)],
            map_bank_account_row,
        )
        .optional()?
        .ok_or(Error::BankAccountNotFound)
}

/// Rename the bank account `bank_account_id` owned by `user_id`.
///
/// The balance is not updatable through this function; balances change only
/// through the transaction engine.
///
/// # Errors
/// This function will return a:
/// - [Error::BankAccountNotFound] if there is no such account for this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_bank_account(
    bank_account_id: BankAccountId,
    user_id: UserId,
    name: &str,
    connection: &Connection,
) -> Result<BankAccount, Error> {
    let rows_affected = connection.execute(
        "UPDATE bank_account SET name = ?1 WHERE id = ?2 AND user_id = ?3",
        (name, bank_account_id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::BankAccountNotFound);
    }

    resolve_bank_account(bank_account_id, user_id, connection)
}

/// Delete the bank account `bank_account_id` owned by `user_id`.
///
/// An account that a payment mode still links to cannot be deleted; the
/// caller must delete the referencing modes first.
///
/// # Errors
/// This function will return a:
/// - [Error::BankAccountNotFound] if there is no such account for this user,
/// - [Error::BankAccountInUse] if a payment mode still links the account,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_bank_account(
    bank_account_id: BankAccountId,
    user_id: UserId,
    connection: &Connection,
) -> Result<(), Error> {
    resolve_bank_account(bank_account_id, user_id, connection)?;

    let linked_modes: i64 = connection.query_row(
        "SELECT COUNT(*) FROM payment_mode WHERE bank_account_id = ?1",
        [bank_account_id],
        |row| row.get(0),
    )?;

    if linked_modes > 0 {
        return Err(Error::BankAccountInUse);
    }

    let rows_affected = connection.execute(
        "DELETE FROM bank_account WHERE id = ?1 AND user_id = ?2",
        (bank_account_id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::BankAccountNotFound);
    }

    Ok(())
}

/// Delete every bank account owned by `user_id` and return the number of
/// deleted rows.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn delete_all_bank_accounts(user_id: UserId, connection: &Connection) -> Result<usize, Error> {
    connection
        .execute("DELETE FROM bank_account WHERE user_id = ?1", [user_id])
        .map_err(|error| error.into())
}

/// Map a database row to a [BankAccount].
fn map_bank_account_row(row: &Row) -> Result<BankAccount, rusqlite::Error> {
    Ok(BankAccount {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        balance: row.get(3)?,
    })
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The request body for creating or updating a bank account.
#[derive(Debug, Deserialize)]
pub struct BankAccountForm {
    /// The display name of the bank account.
    pub name: String,
    /// The opening balance. Defaults to zero.
    #[serde(default)]
    pub balance: f64,
}

/// A route handler for creating a new bank account.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn create_bank_account_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(form): Json<BankAccountForm>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match create_bank_account(user_id, &form.name, form.balance, &connection) {
        Ok(account) => (StatusCode::CREATED, Json(account)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for listing the caller's bank accounts.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_bank_accounts_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match get_bank_accounts(user_id, &connection) {
        Ok(accounts) => Json(accounts).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for renaming a bank account.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn update_bank_account_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(bank_account_id): Path<BankAccountId>,
    Json(form): Json<BankAccountForm>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match update_bank_account(bank_account_id, user_id, &form.name, &connection) {
        Ok(account) => Json(account).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for deleting a bank account.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn delete_bank_account_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(bank_account_id): Path<BankAccountId>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match delete_bank_account(bank_account_id, user_id, &connection) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
