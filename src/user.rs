//! User registration and lookup.
//!
//! Credentials are not stored here; the identity layer in front of this
//! service owns authentication and forwards the verified user id with each
//! request (see [crate::auth]). This module only records which user ids
//! exist and which email they belong to.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::{AppState, Error, account::seed_defaults, database_id::UserId};

// ============================================================================
// MODELS
// ============================================================================

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// The ID of the user.
    pub id: UserId,
    /// The user's email address.
    pub email: String,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the user table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT UNIQUE NOT NULL
                )",
        (),
    )?;

    Ok(())
}

/// Create a new user with the given email address.
///
/// # Errors
/// This function will return a:
/// - [Error::DuplicateEmail] if the email address is already registered,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_user(email: &str, connection: &Connection) -> Result<User, Error> {
    connection.execute("INSERT INTO user (email) VALUES (?1)", [email])?;

    Ok(User {
        id: connection.last_insert_rowid(),
        email: email.to_owned(),
    })
}

/// Load the user `user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::UserNotFound] if there is no such user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_user(user_id: UserId, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare("SELECT id, email FROM user WHERE id = :id")?
        .query_row(&[(":id", &user_id)], |row| {
            Ok(User {
                id: row.get(0)?,
                email: row.get(1)?,
            })
        })
        .optional()?
        .ok_or(Error::UserNotFound)
}

/// Register a new user and seed their account with the default categories,
/// payment modes, and bank account.
///
/// The user row and the seeded defaults are created inside one SQL
/// transaction.
///
/// # Errors
/// This function will return a:
/// - [Error::DuplicateEmail] if the email address is already registered,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn register_user(email: &str, connection: &Connection) -> Result<User, Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    let user = create_user(email, &sql_transaction)?;
    seed_defaults(user.id, &sql_transaction)?;

    sql_transaction.commit()?;

    Ok(user)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The request body for registering a new user.
#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    /// The user's email address.
    pub email: String,
}

/// A route handler for registering a new user.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn register_user_endpoint(
    State(state): State<AppState>,
    Json(form): Json<RegisterForm>,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match register_user(&form.email, &connection) {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
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
        Error, category::get_categories, db::initialize, payment_mode::get_payment_modes,
    };

    use super::{create_user, get_user, register_user};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        conn
    }

    #[test]
    fn create_and_get_user_succeeds() {
        let conn = get_test_connection();

        let created = create_user("foo@bar.baz", &conn).unwrap();
        let fetched = get_user(created.id, &conn).unwrap();

        assert_eq!(created, fetched);
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let conn = get_test_connection();
        create_user("foo@bar.baz", &conn).unwrap();

        assert_eq!(
            create_user("foo@bar.baz", &conn),
            Err(Error::DuplicateEmail)
        );
    }

    #[test]
    fn get_missing_user_fails() {
        let conn = get_test_connection();

        assert_eq!(get_user(1337, &conn), Err(Error::UserNotFound));
    }

    #[test]
    fn register_seeds_the_default_entities() {
        let conn = get_test_connection();

        let user = register_user("foo@bar.baz", &conn).unwrap();

        let categories = get_categories(user.id, &conn).unwrap();
        let category_names: Vec<_> = categories
            .iter()
            .map(|category| category.name.as_str())
            .collect();
        assert_eq!(
            category_names,
            ["Groceries", "Rent", "Commute", "Utilities", "Salary", "Other"]
        );

        let modes = get_payment_modes(user.id, &conn).unwrap();
        let mode_names: Vec<_> = modes.iter().map(|mode| mode.name.as_str()).collect();
        assert_eq!(mode_names, ["Bank", "Cash"]);
    }

    #[test]
    fn failed_registration_leaves_nothing_behind() {
        let conn = get_test_connection();
        let first = register_user("foo@bar.baz", &conn).unwrap();

        assert_eq!(
            register_user("foo@bar.baz", &conn),
            Err(Error::DuplicateEmail)
        );

        // Only the first user's seeded categories exist.
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM category", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 6);
        assert_eq!(
            get_categories(first.id, &conn).unwrap().len(),
            count as usize
        );
    }
}
