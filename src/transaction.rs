//! Transactions and the balance propagation engine.
//!
//! Every transaction stores a positive amount; the direction of its effect
//! on balances is derived from its type:
//!
//! - Income adds the amount to the payment mode and leaves the category's
//!   expenditure alone.
//! - Expense subtracts the amount from the payment mode and adds it to the
//!   category's expenditure.
//! - Transfer subtracts the amount from the source payment mode and adds it
//!   to the destination payment mode. No category is involved.
//!
//! Adding, updating, and deleting a transaction propagate these effects to
//! the surrounding entities inside a single SQL transaction, so balances
//! either all move or none do. An update is a revert of the old effects
//! followed by an apply of the new ones, collapsed into a single incremental
//! delta when the affected entity is unchanged so that re-submitting the
//! same values leaves every balance byte-identical.

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
use time::{Date, OffsetDateTime};

use crate::{
    AppState, Error,
    auth::AuthenticatedUser,
    category::{apply_category_delta, resolve_category},
    database_id::{CategoryId, PaymentModeId, TransactionId, UserId},
    payment_mode::{apply_payment_mode_delta, resolve_payment_mode},
};

// ============================================================================
// MODELS
// ============================================================================

/// The type of a transaction, which fixes the direction of its balance
/// effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Money coming in. Requires a category.
    Income,
    /// Money going out. Requires a category.
    Expense,
    /// Money moved between two payment modes. Requires a destination mode.
    Transfer,
}

impl TransactionKind {
    /// The string stored in the database for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "Income",
            TransactionKind::Expense => "Expense",
            TransactionKind::Transfer => "Transfer",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "Income" => Ok(TransactionKind::Income),
            "Expense" => Ok(TransactionKind::Expense),
            "Transfer" => Ok(TransactionKind::Transfer),
            _ => Err(()),
        }
    }
}

impl ToSql for TransactionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// A single movement of money, as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The ID of the user that owns the transaction.
    pub user_id: UserId,
    /// The magnitude of the movement. Always positive.
    pub amount: f64,
    /// The type of the transaction.
    pub kind: TransactionKind,
    /// The category, present for income and expense transactions.
    pub category_id: Option<CategoryId>,
    /// The payment mode the transaction was paid through.
    pub payment_mode_id: PaymentModeId,
    /// The destination payment mode, present for transfers.
    pub transfer_to_id: Option<PaymentModeId>,
    /// A free-form remark.
    pub remark: String,
    /// The date the transaction occurred.
    pub date: Date,
}

/// A transaction enriched with the display names of the entities it
/// references, for API responses.
///
/// Names are optional because a referenced entity may have been deleted
/// after the transaction was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionDetails {
    /// The stored transaction.
    #[serde(flatten)]
    pub transaction: Transaction,
    /// The name of the category, if it still exists.
    pub category_name: Option<String>,
    /// The name of the payment mode, if it still exists.
    pub payment_mode_name: Option<String>,
    /// The name of the destination payment mode, if it still exists.
    pub transfer_to_name: Option<String>,
}

/// Which entity, besides the payment mode, a transaction's effect lands on.
enum OtherSide {
    Category(CategoryId),
    TransferTo(PaymentModeId),
}

/// The signed effect of a transaction on its payment mode's balance.
fn payment_mode_effect(kind: TransactionKind, amount: f64) -> f64 {
    match kind {
        TransactionKind::Income => amount,
        TransactionKind::Expense | TransactionKind::Transfer => -amount,
    }
}

/// The signed effect of a transaction on its category's expenditure.
fn category_effect(kind: TransactionKind, amount: f64) -> f64 {
    match kind {
        TransactionKind::Expense => amount,
        TransactionKind::Income | TransactionKind::Transfer => 0.0,
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                amount REAL NOT NULL,
                kind TEXT NOT NULL,
                category_id INTEGER,
                payment_mode_id INTEGER NOT NULL,
                transfer_to_id INTEGER,
                remark TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// The request body for creating or updating a transaction.
#[derive(Debug, Deserialize)]
pub struct TransactionForm {
    /// The magnitude of the movement. Must be positive.
    pub amount: f64,
    /// The type of the transaction.
    pub kind: TransactionKind,
    /// The category, required for income and expense transactions.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// The payment mode the transaction is paid through.
    pub payment_mode_id: PaymentModeId,
    /// The destination payment mode, required for transfers.
    #[serde(default)]
    pub transfer_to_id: Option<PaymentModeId>,
    /// A free-form remark.
    #[serde(default)]
    pub remark: String,
    /// The date of the transaction. Defaults to today on create and to the
    /// stored date on update.
    #[serde(default)]
    pub date: Option<Date>,
}

fn validate_amount(amount: f64) -> Result<(), Error> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidAmount)
    }
}

/// Record a new transaction and apply its effects to the referenced
/// balances.
///
/// The row insert and all balance adjustments happen inside one SQL
/// transaction.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidAmount] if the amount is not a positive finite number,
/// - [Error::CategoryRequired] for income/expense without a category,
/// - [Error::TransferDestinationRequired] for a transfer without a
///   destination,
/// - [Error::PaymentModeNotFound], [Error::CategoryNotFound], or
///   [Error::BankAccountNotFound] if a referenced entity does not exist for
///   this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn add_transaction(
    user_id: UserId,
    form: TransactionForm,
    connection: &Connection,
) -> Result<TransactionDetails, Error> {
    validate_amount(form.amount)?;

    let sql_transaction = connection.unchecked_transaction()?;

    let (mode, _) = resolve_payment_mode(form.payment_mode_id, user_id, &sql_transaction)?;

    let (category_id, transfer_to_id) = match form.kind {
        TransactionKind::Transfer => {
            let transfer_to_id = form
                .transfer_to_id
                .ok_or(Error::TransferDestinationRequired)?;
            let (destination, _) =
                resolve_payment_mode(transfer_to_id, user_id, &sql_transaction)?;
            apply_payment_mode_delta(&destination, form.amount, &sql_transaction)?;

            (None, Some(transfer_to_id))
        }
        TransactionKind::Income | TransactionKind::Expense => {
            let category_id = form.category_id.ok_or(Error::CategoryRequired)?;
            let category = resolve_category(category_id, user_id, &sql_transaction)?;
            apply_category_delta(
                &category,
                category_effect(form.kind, form.amount),
                &sql_transaction,
            )?;

            (Some(category_id), None)
        }
    };

    apply_payment_mode_delta(
        &mode,
        payment_mode_effect(form.kind, form.amount),
        &sql_transaction,
    )?;

    let date = form
        .date
        .unwrap_or_else(|| OffsetDateTime::now_utc().date());

    sql_transaction.execute(
        "INSERT INTO \"transaction\"
         (user_id, amount, kind, category_id, payment_mode_id, transfer_to_id, remark, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        (
            user_id,
            form.amount,
            form.kind,
            category_id,
            form.payment_mode_id,
            transfer_to_id,
            &form.remark,
            date,
        ),
    )?;
    let transaction_id = sql_transaction.last_insert_rowid();

    sql_transaction.commit()?;

    get_transaction_details(transaction_id, user_id, connection)
}

/// Rewrite an existing transaction and move every affected balance from the
/// old effects to the new ones.
///
/// Conceptually this reverts the old transaction and applies the new one.
/// When an affected entity is the same before and after, the revert and
/// apply collapse into one incremental delta, so updating a transaction to
/// its current values leaves all balances byte-identical. All adjustments
/// and the row update happen inside one SQL transaction.
///
/// Unlike [delete_transaction], an update requires every referenced entity
/// (old and new) to still exist.
///
/// # Errors
/// This function will return a:
/// - [Error::TransactionNotFound] if there is no such transaction for this
///   user,
/// - [Error::InvalidAmount] if the amount is not a positive finite number,
/// - [Error::CategoryRequired] or [Error::TransferDestinationRequired] if
///   the form is missing the reference its type needs,
/// - [Error::PaymentModeNotFound], [Error::CategoryNotFound], or
///   [Error::BankAccountNotFound] if a referenced entity does not exist for
///   this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_transaction(
    transaction_id: TransactionId,
    user_id: UserId,
    form: TransactionForm,
    connection: &Connection,
) -> Result<TransactionDetails, Error> {
    validate_amount(form.amount)?;

    let sql_transaction = connection.unchecked_transaction()?;

    let old = get_transaction(transaction_id, user_id, &sql_transaction)?;

    let old_side = match old.kind {
        TransactionKind::Transfer => {
            OtherSide::TransferTo(old.transfer_to_id.ok_or(Error::PaymentModeNotFound)?)
        }
        _ => OtherSide::Category(old.category_id.ok_or(Error::CategoryNotFound)?),
    };
    let new_side = match form.kind {
        TransactionKind::Transfer => OtherSide::TransferTo(
            form.transfer_to_id
                .ok_or(Error::TransferDestinationRequired)?,
        ),
        _ => OtherSide::Category(form.category_id.ok_or(Error::CategoryRequired)?),
    };

    match (&old_side, &new_side) {
        (OtherSide::Category(old_id), OtherSide::Category(new_id)) if old_id == new_id => {
            let category = resolve_category(*old_id, user_id, &sql_transaction)?;
            let delta = category_effect(form.kind, form.amount)
                - category_effect(old.kind, old.amount);
            apply_category_delta(&category, delta, &sql_transaction)?;
        }
        (OtherSide::Category(old_id), OtherSide::Category(new_id)) => {
            let old_category = resolve_category(*old_id, user_id, &sql_transaction)?;
            apply_category_delta(
                &old_category,
                -category_effect(old.kind, old.amount),
                &sql_transaction,
            )?;
            let new_category = resolve_category(*new_id, user_id, &sql_transaction)?;
            apply_category_delta(
                &new_category,
                category_effect(form.kind, form.amount),
                &sql_transaction,
            )?;
        }
        (OtherSide::Category(old_id), OtherSide::TransferTo(new_id)) => {
            let old_category = resolve_category(*old_id, user_id, &sql_transaction)?;
            apply_category_delta(
                &old_category,
                -category_effect(old.kind, old.amount),
                &sql_transaction,
            )?;
            let (destination, _) = resolve_payment_mode(*new_id, user_id, &sql_transaction)?;
            apply_payment_mode_delta(&destination, form.amount, &sql_transaction)?;
        }
        (OtherSide::TransferTo(old_id), OtherSide::Category(new_id)) => {
            let (old_destination, _) = resolve_payment_mode(*old_id, user_id, &sql_transaction)?;
            apply_payment_mode_delta(&old_destination, -old.amount, &sql_transaction)?;
            let new_category = resolve_category(*new_id, user_id, &sql_transaction)?;
            apply_category_delta(
                &new_category,
                category_effect(form.kind, form.amount),
                &sql_transaction,
            )?;
        }
        (OtherSide::TransferTo(old_id), OtherSide::TransferTo(new_id)) if old_id == new_id => {
            let (destination, _) = resolve_payment_mode(*old_id, user_id, &sql_transaction)?;
            apply_payment_mode_delta(&destination, form.amount - old.amount, &sql_transaction)?;
        }
        (OtherSide::TransferTo(old_id), OtherSide::TransferTo(new_id)) => {
            let (old_destination, _) = resolve_payment_mode(*old_id, user_id, &sql_transaction)?;
            apply_payment_mode_delta(&old_destination, -old.amount, &sql_transaction)?;
            let (new_destination, _) = resolve_payment_mode(*new_id, user_id, &sql_transaction)?;
            apply_payment_mode_delta(&new_destination, form.amount, &sql_transaction)?;
        }
    }

    if form.payment_mode_id == old.payment_mode_id {
        let (mode, _) = resolve_payment_mode(old.payment_mode_id, user_id, &sql_transaction)?;
        let delta = payment_mode_effect(form.kind, form.amount)
            - payment_mode_effect(old.kind, old.amount);
        apply_payment_mode_delta(&mode, delta, &sql_transaction)?;
    } else {
        let (old_mode, _) = resolve_payment_mode(old.payment_mode_id, user_id, &sql_transaction)?;
        apply_payment_mode_delta(
            &old_mode,
            -payment_mode_effect(old.kind, old.amount),
            &sql_transaction,
        )?;
        let (new_mode, _) = resolve_payment_mode(form.payment_mode_id, user_id, &sql_transaction)?;
        apply_payment_mode_delta(
            &new_mode,
            payment_mode_effect(form.kind, form.amount),
            &sql_transaction,
        )?;
    }

    let (category_id, transfer_to_id) = match new_side {
        OtherSide::Category(id) => (Some(id), None),
        OtherSide::TransferTo(id) => (None, Some(id)),
    };
    let date = form.date.unwrap_or(old.date);

    sql_transaction.execute(
        "UPDATE \"transaction\"
         SET amount = ?1, kind = ?2, category_id = ?3, payment_mode_id = ?4,
             transfer_to_id = ?5, remark = ?6, date = ?7
         WHERE id = ?8 AND user_id = ?9",
        (
            form.amount,
            form.kind,
            category_id,
            form.payment_mode_id,
            transfer_to_id,
            &form.remark,
            date,
            transaction_id,
            user_id,
        ),
    )?;

    sql_transaction.commit()?;

    get_transaction_details(transaction_id, user_id, connection)
}

/// Delete a transaction and revert its effects on the referenced balances.
///
/// A referenced entity that has since been deleted only loses its share of
/// the revert; the deletion itself still goes through, with a warning in the
/// log. The row delete and all adjustments happen inside one SQL
/// transaction.
///
/// # Errors
/// This function will return a:
/// - [Error::TransactionNotFound] if there is no such transaction for this
///   user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_transaction(
    transaction_id: TransactionId,
    user_id: UserId,
    connection: &Connection,
) -> Result<(), Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    let old = get_transaction(transaction_id, user_id, &sql_transaction)?;

    match old.kind {
        TransactionKind::Transfer => {
            if let Some(destination_id) = old.transfer_to_id {
                match resolve_payment_mode(destination_id, user_id, &sql_transaction) {
                    Ok((destination, _)) => {
                        apply_payment_mode_delta(&destination, -old.amount, &sql_transaction)?;
                    }
                    Err(Error::PaymentModeNotFound | Error::BankAccountNotFound) => {
                        tracing::warn!(
                            "Skipping revert for transaction {transaction_id}: destination \
                             payment mode {destination_id} no longer exists"
                        );
                    }
                    Err(error) => return Err(error),
                }
            }
        }
        TransactionKind::Income | TransactionKind::Expense => {
            if let Some(category_id) = old.category_id {
                match resolve_category(category_id, user_id, &sql_transaction) {
                    Ok(category) => {
                        apply_category_delta(
                            &category,
                            -category_effect(old.kind, old.amount),
                            &sql_transaction,
                        )?;
                    }
                    Err(Error::CategoryNotFound) => {
                        tracing::warn!(
                            "Skipping revert for transaction {transaction_id}: category \
                             {category_id} no longer exists"
                        );
                    }
                    Err(error) => return Err(error),
                }
            }
        }
    }

    match resolve_payment_mode(old.payment_mode_id, user_id, &sql_transaction) {
        Ok((mode, _)) => {
            apply_payment_mode_delta(
                &mode,
                -payment_mode_effect(old.kind, old.amount),
                &sql_transaction,
            )?;
        }
        Err(Error::PaymentModeNotFound | Error::BankAccountNotFound) => {
            tracing::warn!(
                "Skipping revert for transaction {transaction_id}: payment mode {} no longer \
                 exists",
                old.payment_mode_id
            );
        }
        Err(error) => return Err(error),
    }

    sql_transaction.execute(
        "DELETE FROM \"transaction\" WHERE id = ?1 AND user_id = ?2",
        (transaction_id, user_id),
    )?;

    sql_transaction.commit()?;

    Ok(())
}

/// Load the transaction `transaction_id` owned by `user_id`.
///
/// A transaction that exists but belongs to another user is reported the
/// same way as one that does not exist.
///
/// # Errors
/// This function will return a:
/// - [Error::TransactionNotFound] if there is no such transaction for this
///   user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_transaction(
    transaction_id: TransactionId,
    user_id: UserId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    connection
        .prepare(
            "SELECT id, user_id, amount, kind, category_id, payment_mode_id, transfer_to_id,
                    remark, date
             FROM \"transaction\"
             WHERE id = :id AND user_id = :user_id",
        )?
        .query_row(
            &[(":id", &transaction_id), (":user_id", &user_id)],
            map_transaction_row,
        )
        .optional()?
        .ok_or(Error::TransactionNotFound)
}

/// Load the transaction `transaction_id` with the names of the entities it
/// references.
///
/// # Errors
/// This function will return a:
/// - [Error::TransactionNotFound] if there is no such transaction for this
///   user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_transaction_details(
    transaction_id: TransactionId,
    user_id: UserId,
    connection: &Connection,
) -> Result<TransactionDetails, Error> {
    connection
        .prepare(&format!(
            "{DETAILS_QUERY} WHERE t.id = :id AND t.user_id = :user_id"
        ))?
        .query_row(
            &[(":id", &transaction_id), (":user_id", &user_id)],
            map_transaction_details_row,
        )
        .optional()?
        .ok_or(Error::TransactionNotFound)
}

/// Retrieve all transactions owned by `user_id`, newest first.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_transactions(
    user_id: UserId,
    connection: &Connection,
) -> Result<Vec<TransactionDetails>, Error> {
    connection
        .prepare(&format!(
            "{DETAILS_QUERY} WHERE t.user_id = :user_id ORDER BY t.date DESC, t.id DESC"
        ))?
        .query_map(&[(":user_id", &user_id)], map_transaction_details_row)?
        .map(|details_result| details_result.map_err(Error::SqlError))
        .collect()
}

/// Delete every transaction owned by `user_id` and return the number of
/// deleted rows.
///
/// No balances are reverted; the caller is expected to reset or delete the
/// surrounding entities as well.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn delete_all_transactions(user_id: UserId, connection: &Connection) -> Result<usize, Error> {
    connection
        .execute("DELETE FROM \"transaction\" WHERE user_id = ?1", [user_id])
        .map_err(|error| error.into())
}

const DETAILS_QUERY: &str = "SELECT t.id, t.user_id, t.amount, t.kind, t.category_id,
            t.payment_mode_id, t.transfer_to_id, t.remark, t.date,
            c.name, pm.name, tpm.name
     FROM \"transaction\" t
     LEFT JOIN category c ON t.category_id = c.id
     LEFT JOIN payment_mode pm ON t.payment_mode_id = pm.id
     LEFT JOIN payment_mode tpm ON t.transfer_to_id = tpm.id";

/// Map a database row to a [Transaction].
fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        kind: row.get(3)?,
        category_id: row.get(4)?,
        payment_mode_id: row.get(5)?,
        transfer_to_id: row.get(6)?,
        remark: row.get(7)?,
        date: row.get(8)?,
    })
}

/// Map a database row from [DETAILS_QUERY] to a [TransactionDetails].
fn map_transaction_details_row(row: &Row) -> Result<TransactionDetails, rusqlite::Error> {
    Ok(TransactionDetails {
        transaction: map_transaction_row(row)?,
        category_name: row.get(9)?,
        payment_mode_name: row.get(10)?,
        transfer_to_name: row.get(11)?,
    })
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// A route handler for recording a new transaction.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn create_transaction_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(form): Json<TransactionForm>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match add_transaction(user_id, form, &connection) {
        Ok(details) => (StatusCode::CREATED, Json(details)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for listing the caller's transactions, newest first.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_transactions_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match get_transactions(user_id, &connection) {
        Ok(transactions) => Json(transactions).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for rewriting a transaction.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn update_transaction_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(transaction_id): Path<TransactionId>,
    Json(form): Json<TransactionForm>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match update_transaction(transaction_id, user_id, form, &connection) {
        Ok(details) => Json(details).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for deleting a transaction.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn delete_transaction_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(transaction_id): Path<TransactionId>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match delete_transaction(transaction_id, user_id, &connection) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
