//! Categories: budget buckets with an accumulated expenditure total.
//!
//! The `expenditure` column is only ever written through
//! [apply_category_delta], which the transaction engine calls when applying
//! or reverting a transaction's effect. Expense transactions increase it;
//! income transactions require a category but do not move it (see the module
//! documentation in [crate::transaction] for the sign conventions).

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
    database_id::{CategoryId, UserId},
};

// ============================================================================
// MODELS
// ============================================================================

/// Whether a category groups income or expense transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryKind {
    /// The category groups money coming in (e.g. "Salary").
    Income,
    /// The category groups money going out (e.g. "Groceries").
    Expense,
}

impl CategoryKind {
    /// The string stored in the database for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Income => "Income",
            CategoryKind::Expense => "Expense",
        }
    }
}

impl FromStr for CategoryKind {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "Income" => Ok(CategoryKind::Income),
            "Expense" => Ok(CategoryKind::Expense),
            _ => Err(()),
        }
    }
}

impl ToSql for CategoryKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CategoryKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// A budget bucket with an accumulated expenditure total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    /// The ID of the category.
    pub id: CategoryId,
    /// The ID of the user that owns the category.
    pub user_id: UserId,
    /// The display name of the category.
    pub name: String,
    /// Whether the category groups income or expense transactions.
    pub kind: CategoryKind,
    /// The monthly budget for the category.
    pub budget: f64,
    /// The accumulated spend against the category.
    pub expenditure: f64,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the category table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_category_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS category (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                budget REAL NOT NULL DEFAULT 0,
                expenditure REAL NOT NULL DEFAULT 0,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Create a new category for `user_id` with a zero expenditure.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn create_category(
    user_id: UserId,
    name: &str,
    kind: CategoryKind,
    budget: f64,
    connection: &Connection,
) -> Result<Category, Error> {
    connection.execute(
        "INSERT INTO category (user_id, name, kind, budget, expenditure)
         VALUES (?1, ?2, ?3, ?4, 0)",
        (user_id, name, kind, budget),
    )?;

    Ok(Category {
        id: connection.last_insert_rowid(),
        user_id,
        name: name.to_owned(),
        kind,
        budget,
        expenditure: 0.0,
    })
}

/// Retrieve all categories owned by `user_id`.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_categories(user_id: UserId, connection: &Connection) -> Result<Vec<Category>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, kind, budget, expenditure FROM category
             WHERE user_id = :user_id",
        )?
        .query_map(&[(":user_id", &user_id)], map_category_row)?
        .map(|category_result| category_result.map_err(Error::SqlError))
        .collect()
}

/// Load the category `category_id` owned by `user_id`.
///
/// A category that exists but belongs to another user is reported the same
/// way as one that does not exist.
///
/// # Errors
/// This function will return a:
/// - [Error::CategoryNotFound] if there is no such category for this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn resolve_category(
    category_id: CategoryId,
    user_id: UserId,
    connection: &Connection,
) -> Result<Category, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, kind, budget, expenditure FROM category
             WHERE id = :id AND user_id = :user_id",
        )?
        .query_row(
            &[(":id", &category_id), (":user_id", &user_id)],
            map_category_row,
        )
        .optional()?
        .ok_or(Error::CategoryNotFound)
}

/// Add `delta` to the category's accumulated expenditure.
///
/// The update is relative (`expenditure = expenditure + delta`) so that
/// several adjustments within one operation compose without re-reading the
/// row. A zero delta is a no-op and issues no SQL at all, which keeps an
/// update-to-same-values exactly byte-identical on the stored float.
///
/// # Errors
/// This function will return a:
/// - [Error::CategoryNotFound] if the category row has disappeared,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn apply_category_delta(
    category: &Category,
    delta: f64,
    connection: &Connection,
) -> Result<(), Error> {
    if delta == 0.0 {
        return Ok(());
    }

    let rows_affected = connection.execute(
        "UPDATE category SET expenditure = expenditure + ?1 WHERE id = ?2 AND user_id = ?3",
        (delta, category.id, category.user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::CategoryNotFound);
    }

    Ok(())
}

/// Update the name, kind, and budget of the category `category_id`.
///
/// The expenditure is untouched; it changes only through the transaction
/// engine.
///
/// # Errors
/// This function will return a:
/// - [Error::CategoryNotFound] if there is no such category for this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_category(
    category_id: CategoryId,
    user_id: UserId,
    name: &str,
    kind: CategoryKind,
    budget: f64,
    connection: &Connection,
) -> Result<Category, Error> {
    let rows_affected = connection.execute(
        "UPDATE category SET name = ?1, kind = ?2, budget = ?3 WHERE id = ?4 AND user_id = ?5",
        (name, kind, budget, category_id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::CategoryNotFound);
    }

    resolve_category(category_id, user_id, connection)
}

/// Delete the category `category_id` owned by `user_id`.
///
/// Transactions referencing the category are left in place; the transaction
/// engine tolerates the orphaned reference on delete (see
/// [crate::transaction::delete_transaction]).
///
/// # Errors
/// This function will return a:
/// - [Error::CategoryNotFound] if there is no such category for this user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_category(
    category_id: CategoryId,
    user_id: UserId,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "DELETE FROM category WHERE id = ?1 AND user_id = ?2",
        (category_id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::CategoryNotFound);
    }

    Ok(())
}

/// Set `expenditure = 0` for every category owned by `user_id` and return
/// the number of affected rows.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn reset_categories_expenditure(
    user_id: UserId,
    connection: &Connection,
) -> Result<usize, Error> {
    connection
        .execute("UPDATE category SET expenditure = 0 WHERE user_id = ?1", [user_id])
        .map_err(|error| error.into())
}

/// Delete every category owned by `user_id` and return the number of deleted
/// rows.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn delete_all_categories(user_id: UserId, connection: &Connection) -> Result<usize, Error> {
    connection
        .execute("DELETE FROM category WHERE user_id = ?1", [user_id])
        .map_err(|error| error.into())
}

/// Map a database row to a [Category].
fn map_category_row(row: &Row) -> Result<Category, rusqlite::Error> {
    Ok(Category {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        kind: row.get(3)?,
        budget: row.get(4)?,
        expenditure: row.get(5)?,
    })
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The request body for creating or updating a category.
#[derive(Debug, Deserialize)]
pub struct CategoryForm {
    /// The display name of the category.
    pub name: String,
    /// Whether the category groups income or expense transactions.
    pub kind: CategoryKind,
    /// The monthly budget. Defaults to zero.
    #[serde(default)]
    pub budget: f64,
}

/// A route handler for creating a new category.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn create_category_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(form): Json<CategoryForm>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match create_category(user_id, &form.name, form.kind, form.budget, &connection) {
        Ok(category) => (StatusCode::CREATED, Json(category)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for listing the caller's categories.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_categories_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match get_categories(user_id, &connection) {
        Ok(categories) => Json(categories).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for updating a category's name, kind, and budget.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn update_category_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(category_id): Path<CategoryId>,
    Json(form): Json<CategoryForm>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match update_category(
        category_id,
        user_id,
        &form.name,
        form.kind,
        form.budget,
        &connection,
    ) {
        Ok(category) => Json(category).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for deleting a category.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn delete_category_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(category_id): Path<CategoryId>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match delete_category(category_id, user_id, &connection) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
