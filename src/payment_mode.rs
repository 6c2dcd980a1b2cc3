//! Payment modes: the instruments a transaction is paid through.
//!
//! A mode of type `Bank` carries no balance of its own; it points at a bank
//! account and the account's balance is authoritative. All other modes
//! (cash, wallets, credit cards) carry their own balance. The transaction
//! engine adjusts either one through [apply_payment_mode_delta], which
//! dispatches on the link, so the engine never needs to know which storage
//! backs a given mode.

use std::str::FromStr;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{
    Connection, OptionalExtension, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    auth::AuthenticatedUser,
    bank_account::{BankAccount, resolve_bank_account},
    database_id::{BankAccountId, PaymentModeId, UserId},
};

// ============================================================================
// MODELS
// ============================================================================

/// The kind of instrument behind a payment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentModeKind {
    /// Backed by a linked bank account; the account's balance is authoritative.
    Bank,
    /// Physical cash on hand.
    Cash,
    /// A digital wallet or prepaid balance.
    Wallet,
    /// A credit card, where the balance tracks the amount owed.
    #[serde(rename = "Credit_Card")]
    CreditCard,
}

impl PaymentModeKind {
    /// The string stored in the database for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentModeKind::Bank => "Bank",
            PaymentModeKind::Cash => "Cash",
            PaymentModeKind::Wallet => "Wallet",
            PaymentModeKind::CreditCard => "Credit_Card",
        }
    }
}

impl FromStr for PaymentModeKind {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "Bank" => Ok(PaymentModeKind::Bank),
            "Cash" => Ok(PaymentModeKind::Cash),
            "Wallet" => Ok(PaymentModeKind::Wallet),
            "Credit_Card" => Ok(PaymentModeKind::CreditCard),
            _ => Err(()),
        }
    }
}

impl ToSql for PaymentModeKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PaymentModeKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// An instrument a transaction is paid through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentMode {
    /// The ID of the payment mode.
    pub id: PaymentModeId,
    /// The ID of the user that owns the payment mode.
    pub user_id: UserId,
    /// The display name of the payment mode.
    pub name: String,
    /// The kind of instrument behind the payment mode.
    pub kind: PaymentModeKind,
    /// The balance carried by the mode itself.
    ///
    /// Zero and ignored for `Bank` modes, whose linked account holds the
    /// authoritative balance.
    pub balance: f64,
    /// The linked bank account. `Some` exactly when `kind` is `Bank`.
    pub bank_account_id: Option<BankAccountId>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the payment mode table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_payment_mode_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS payment_mode (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                balance REAL NOT NULL DEFAULT 0,
                bank_account_id INTEGER,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE,
                FOREIGN KEY(bank_account_id) REFERENCES bank_account(id)
                )",
        (),
    )?;

    Ok(())
}

/// Create a new payment mode for `user_id`.
///
/// Modes of type `Bank` must link a bank account owned by the same user and
/// store a zero balance of their own; modes of any other type must not link
/// one.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidBankAccountLink] if the link does not match the kind,
/// - [Error::BankAccountNotFound] if the linked account does not exist for
///   this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_payment_mode(
    user_id: UserId,
    name: &str,
    kind: PaymentModeKind,
    balance: f64,
    bank_account_id: Option<BankAccountId>,
    connection: &Connection,
) -> Result<PaymentMode, Error> {
    let (balance, bank_account_id) = match (kind, bank_account_id) {
        (PaymentModeKind::Bank, Some(account_id)) => {
            resolve_bank_account(account_id, user_id, connection)?;
            (0.0, Some(account_id))
        }
        (PaymentModeKind::Bank, None) => return Err(Error::InvalidBankAccountLink),
        (_, Some(_)) => return Err(Error::InvalidBankAccountLink),
        (_, None) => (balance, None),
    };

    connection.execute(
        "INSERT INTO payment_mode (user_id, name, kind, balance, bank_account_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        (user_id, name, kind, balance, bank_account_id),
    )?;

    Ok(PaymentMode {
        id: connection.last_insert_rowid(),
        user_id,
        name: name.to_owned(),
        kind,
        balance,
        bank_account_id,
    })
}

/// Retrieve all payment modes owned by `user_id`.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_payment_modes(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<PaymentMode>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, kind, balance, bank_account_id FROM payment_mode
             WHERE user_id = :user_id",
        )?
        .query_map(&[(":user_id", &user_id)], map_payment_mode_row)?
        .map(|mode_result| mode_result.map_err(Error::SqlError))
        .collect()
}

/// Load the payment mode `payment_mode_id` owned by `user_id`, along with
/// its linked bank account when the mode is bank-backed.
///
/// A mode that exists but belongs to another user is reported the same way
/// as one that does not exist.
///
/// # Errors
/// This function will return a:
/// - [Error::PaymentModeNotFound] if there is no such mode for this user,
/// - [Error::BankAccountNotFound] if the mode links a bank account that no
///   longer exists,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn resolve_payment_mode(
    payment_mode_id: PaymentModeId,
    user_id: UserId,
    connection: &Connection,
) -> Result<(PaymentMode, Option<BankAccount>), Error> {
    let mode = connection
        .prepare(
            "SELECT id, user_id, name, kind, balance, bank_account_id FROM payment_mode
             WHERE id = :id AND user_id = :user_id",
        )?
        .query_row(
            &[(":id", &payment_mode_id), (":user_id", &user_id)],
            map_payment_mode_row,
        )
        .optional()?
        .ok_or(Error::PaymentModeNotFound)?;

    let bank_account = match mode.bank_account_id {
        Some(account_id) => Some(resolve_bank_account(account_id, user_id, connection)?),
        None => None,
    };

    Ok((mode, bank_account))
}

/// Add `delta` to the balance behind the payment mode.
///
/// For a bank-linked mode the linked account's balance is adjusted; for any
/// other mode, the mode's own balance. The update is relative
/// (`balance = balance + delta`) so that several modes feeding the same bank
/// account compose correctly within one operation. A zero delta is a no-op
/// and issues no SQL at all.
///
/// # Errors
/// This function will return a:
/// - [Error::BankAccountNotFound] if the linked account row has disappeared,
/// - [Error::PaymentModeNotFound] if the mode row has disappeared,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn apply_payment_mode_delta(
    mode: &PaymentMode,
    delta: f64,
    connection: &Connection,
) -> Result<(), Error> {
    if delta == 0.0 {
        return Ok(());
    }

    match mode.bank_account_id {
        Some(account_id) => {
            let rows_affected = connection.execute(
                "UPDATE bank_account SET balance = balance + ?1 WHERE id = ?2 AND user_id = ?3",
                (delta, account_id, mode.user_id),
            )?;

            if rows_affected == 0 {
                return Err(Error::BankAccountNotFound);
            }
        }
        None => {
            let rows_affected = connection.execute(
                "UPDATE payment_mode SET balance = balance + ?1 WHERE id = ?2 AND user_id = ?3",
                (delta, mode.id, mode.user_id),
            )?;

            if rows_affected == 0 {
                return Err(Error::PaymentModeNotFound);
            }
        }
    }

    Ok(())
}

/// Rename the payment mode `payment_mode_id` owned by `user_id`.
///
/// The kind, link, and balance are fixed at creation; balances change only
/// through the transaction engine.
///
/// # Errors
/// This function will return a:
/// - [Error::PaymentModeNotFound] if there is no such mode for this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_payment_mode(
    payment_mode_id: PaymentModeId,
    user_id: UserId,
    name: &str,
    connection: &Connection,
) -> Result<PaymentMode, Error> {
    let rows_affected = connection.execute(
        "UPDATE payment_mode SET name = ?1 WHERE id = ?2 AND user_id = ?3",
        (name, payment_mode_id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::PaymentModeNotFound);
    }

    let (mode, _) = resolve_payment_mode(payment_mode_id, user_id, connection)?;

    Ok(mode)
}

/// Delete the payment mode `payment_mode_id` owned by `user_id`.
///
/// A linked bank account is left in place. Transactions referencing the mode
/// are also left in place; the transaction engine tolerates the orphaned
/// reference on delete (see [crate::transaction::delete_transaction]).
///
/// # Errors
/// This function will return a:
/// - [Error::PaymentModeNotFound] if there is no such mode for this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_payment_mode(
    payment_mode_id: PaymentModeId,
    user_id: UserId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "DELETE FROM payment_mode WHERE id = ?1 AND user_id = ?2",
        (payment_mode_id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::PaymentModeNotFound);
    }

    Ok(())
}

/// Delete every payment mode owned by `user_id`, along with the bank
/// accounts they link, and return the number of deleted modes.
///
/// The modes go first so no row referencing a bank account remains when the
/// accounts are deleted.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn delete_all_payment_modes(user_id: UserId, connection: &Connection) -> Result<usize, Error> {
    let deleted = connection.execute("DELETE FROM payment_mode WHERE user_id = ?1", [user_id])?;

    crate::bank_account::delete_all_bank_accounts(user_id, connection)?;

    Ok(deleted)
}

/// Map a database row to a [PaymentMode].
fn map_payment_mode_row(row: &Row) -> Result<PaymentMode, rusqlite::Error> {
    Ok(PaymentMode {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        kind: row.get(3)?,
        balance: row.get(4)?,
        bank_account_id: row.get(5)?,
    })
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The request body for creating or updating a payment mode.
#[derive(Debug, Deserialize)]
pub struct PaymentModeForm {
    /// The display name of the payment mode.
    pub name: String,
    /// The kind of instrument behind the payment mode.
    pub kind: PaymentModeKind,
    /// The opening balance for non-bank modes. Defaults to zero.
    #[serde(default)]
    pub balance: f64,
    /// The bank account to link, required for `Bank` modes.
    #[serde(default)]
    pub bank_account_id: Option<BankAccountId>,
}

/// A route handler for creating a new payment mode.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn create_payment_mode_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(form): Json<PaymentModeForm>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match create_payment_mode(
        user_id,
        &form.name,
        form.kind,
        form.balance,
        form.bank_account_id,
        &connection,
    ) {
        Ok(mode) => (StatusCode::CREATED, Json(mode)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for listing the caller's payment modes.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_payment_modes_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match get_payment_modes(user_id, &connection) {
        Ok(modes) => Json(modes).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for renaming a payment mode.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn update_payment_mode_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(payment_mode_id): Path<PaymentModeId>,
    Json(form): Json<PaymentModeForm>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match update_payment_mode(payment_mode_id, user_id, &form.name, &connection) {
        Ok(mode) => Json(mode).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for deleting a payment mode.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn delete_payment_mode_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(payment_mode_id): Path<PaymentModeId>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match delete_payment_mode(payment_mode_id, user_id, &connection) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        bank_account::{create_bank_account, get_bank_accounts, resolve_bank_account},
        db::initialize,
        user::create_user,
    };

    use super::{
        PaymentModeKind, apply_payment_mode_delta, create_payment_mode, delete_all_payment_modes,
        delete_payment_mode, get_payment_modes, resolve_payment_mode, update_payment_mode,
    };

    fn get_test_connection() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let user = create_user("foo@bar.baz", &conn).unwrap();

        (conn, user.id)
    }

    #[test]
    fn bank_mode_requires_link() {
        let (conn, user_id) = get_test_connection();

        assert_eq!(
            create_payment_mode(user_id, "Bank", PaymentModeKind::Bank, 0.0, None, &conn),
            Err(Error::InvalidBankAccountLink)
        );
    }

    #[test]
    fn non_bank_mode_rejects_link() {
        let (conn, user_id) = get_test_connection();
        let account = create_bank_account(user_id, "Checking", 0.0, &conn).unwrap();

        assert_eq!(
            create_payment_mode(
                user_id,
                "Cash",
                PaymentModeKind::Cash,
                0.0,
                Some(account.id),
                &conn
            ),
            Err(Error::InvalidBankAccountLink)
        );
    }

    #[test]
    fn bank_mode_stores_zero_balance() {
        let (conn, user_id) = get_test_connection();
        let account = create_bank_account(user_id, "Checking", 500.0, &conn).unwrap();

        let mode = create_payment_mode(
            user_id,
            "Debit card",
            PaymentModeKind::Bank,
            123.0,
            Some(account.id),
            &conn,
        )
        .unwrap();

        assert_eq!(mode.balance, 0.0);
        assert_eq!(mode.bank_account_id, Some(account.id));
    }

    #[test]
    fn bank_mode_rejects_other_users_account() {
        let (conn, user_id) = get_test_connection();
        let other_user = create_user("other@bar.baz", &conn).unwrap();
        let account = create_bank_account(other_user.id, "Checking", 0.0, &conn).unwrap();

        assert_eq!(
            create_payment_mode(
                user_id,
                "Debit card",
                PaymentModeKind::Bank,
                0.0,
                Some(account.id),
                &conn
            ),
            Err(Error::BankAccountNotFound)
        );
    }

    #[test]
    fn delta_on_plain_mode_moves_own_balance() {
        let (conn, user_id) = get_test_connection();
        let mode =
            create_payment_mode(user_id, "Cash", PaymentModeKind::Cash, 100.0, None, &conn)
                .unwrap();

        apply_payment_mode_delta(&mode, -40.0, &conn).unwrap();

        let (mode, account) = resolve_payment_mode(mode.id, user_id, &conn).unwrap();
        assert_eq!(mode.balance, 60.0);
        assert!(account.is_none());
    }

    #[test]
    fn delta_on_bank_mode_moves_linked_account() {
        let (conn, user_id) = get_test_connection();
        let account = create_bank_account(user_id, "Checking", 200.0, &conn).unwrap();
        let mode = create_payment_mode(
            user_id,
            "Debit card",
            PaymentModeKind::Bank,
            0.0,
            Some(account.id),
            &conn,
        )
        .unwrap();

        apply_payment_mode_delta(&mode, -40.0, &conn).unwrap();

        let (mode, linked) = resolve_payment_mode(mode.id, user_id, &conn).unwrap();
        assert_eq!(mode.balance, 0.0);
        assert_eq!(linked.unwrap().balance, 160.0);
    }

    #[test]
    fn deltas_from_two_modes_compose_on_shared_account() {
        let (conn, user_id) = get_test_connection();
        let account = create_bank_account(user_id, "Checking", 100.0, &conn).unwrap();
        let debit_card = create_payment_mode(
            user_id,
            "Debit card",
            PaymentModeKind::Bank,
            0.0,
            Some(account.id),
            &conn,
        )
        .unwrap();
        let online = create_payment_mode(
            user_id,
            "Online banking",
            PaymentModeKind::Bank,
            0.0,
            Some(account.id),
            &conn,
        )
        .unwrap();

        apply_payment_mode_delta(&debit_card, -30.0, &conn).unwrap();
        apply_payment_mode_delta(&online, -20.0, &conn).unwrap();

        let account = resolve_bank_account(account.id, user_id, &conn).unwrap();
        assert_eq!(account.balance, 50.0);
    }

    #[test]
    fn update_renames_only() {
        let (conn, user_id) = get_test_connection();
        let mode =
            create_payment_mode(user_id, "Cash", PaymentModeKind::Cash, 25.0, None, &conn)
                .unwrap();

        let renamed = update_payment_mode(mode.id, user_id, "Petty cash", &conn).unwrap();

        assert_eq!(renamed.name, "Petty cash");
        assert_eq!(renamed.kind, PaymentModeKind::Cash);
        assert_eq!(renamed.balance, 25.0);
    }

    #[test]
    fn delete_missing_mode_fails() {
        let (conn, user_id) = get_test_connection();

        assert_eq!(
            delete_payment_mode(1337, user_id, &conn),
            Err(Error::PaymentModeNotFound)
        );
    }

    #[test]
    fn delete_all_removes_modes_and_their_bank_accounts() {
        let (conn, user_id) = get_test_connection();
        let account = create_bank_account(user_id, "Checking", 0.0, &conn).unwrap();
        create_payment_mode(
            user_id,
            "Debit card",
            PaymentModeKind::Bank,
            0.0,
            Some(account.id),
            &conn,
        )
        .unwrap();
        create_payment_mode(user_id, "Cash", PaymentModeKind::Cash, 0.0, None, &conn).unwrap();

        let deleted = delete_all_payment_modes(user_id, &conn).unwrap();

        assert_eq!(deleted, 2);
        assert!(get_payment_modes(user_id, &conn).unwrap().is_empty());
        assert!(get_bank_accounts(user_id, &conn).unwrap().is_empty());
    }
}
