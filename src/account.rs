//! Account-level operations: the summary, the default seed, and the reset
//! and delete lifecycle.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::Serialize;

use crate::{
    AppState, Error,
    auth::AuthenticatedUser,
    bank_account::create_bank_account,
    category::{CategoryKind, create_category, delete_all_categories},
    database_id::UserId,
    payment_mode::{PaymentModeKind, create_payment_mode, delete_all_payment_modes},
    transaction::delete_all_transactions,
    user::get_user,
};

// ============================================================================
// MODELS
// ============================================================================

/// The balance behind a payment mode, for the account summary.
///
/// Bank-linked modes report the linked account's balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentModeBalance {
    /// The display name of the payment mode.
    pub name: String,
    /// The balance behind the payment mode.
    pub balance: f64,
}

/// A roll-up of the user's financial position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    /// Total income minus total expense, over all transactions.
    pub net_balance: f64,
    /// The sum of all expense transaction amounts.
    pub total_spent: f64,
    /// The sum of all category budgets.
    pub total_budget: f64,
    /// The sum of all category expenditures.
    pub total_expenditure: f64,
    /// The balance behind each payment mode.
    pub payment_modes: Vec<PaymentModeBalance>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Compute the account summary for `user_id`.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_account_summary(
    user_id: UserId,
    connection: &Connection,
) -> Result<AccountSummary, Error> {
    let (total_income, total_spent) = connection.query_row(
        "SELECT COALESCE(SUM(CASE WHEN kind = 'Income' THEN amount END), 0),
                COALESCE(SUM(CASE WHEN kind = 'Expense' THEN amount END), 0)
         FROM \"transaction\"
         WHERE user_id = ?1",
        [user_id],
        |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
    )?;

    let (total_budget, total_expenditure) = connection.query_row(
        "SELECT COALESCE(SUM(budget), 0), COALESCE(SUM(expenditure), 0)
         FROM category
         WHERE user_id = ?1",
        [user_id],
        |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
    )?;

    let payment_modes = connection
        .prepare(
            "SELECT pm.name, COALESCE(b.balance, pm.balance)
             FROM payment_mode pm
             LEFT JOIN bank_account b ON pm.bank_account_id = b.id
             WHERE pm.user_id = :user_id",
        )?
        .query_map(&[(":user_id", &user_id)], |row| {
            Ok(PaymentModeBalance {
                name: row.get(0)?,
                balance: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AccountSummary {
        net_balance: total_income - total_spent,
        total_spent,
        total_budget,
        total_expenditure,
        payment_modes,
    })
}

/// Create the default entities for a fresh account: a "Checking" bank
/// account with a "Bank" payment mode linked to it, a "Cash" wallet mode,
/// and the standard category list.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn seed_defaults(user_id: UserId, connection: &Connection) -> Result<(), Error> {
    let checking = create_bank_account(user_id, "Checking", 0.0, connection)?;
    create_payment_mode(
        user_id,
        "Bank",
        PaymentModeKind::Bank,
        0.0,
        Some(checking.id),
        connection,
    )?;
    create_payment_mode(user_id, "Cash", PaymentModeKind::Wallet, 0.0, None, connection)?;

    for (name, kind) in [
        ("Groceries", CategoryKind::Expense),
        ("Rent", CategoryKind::Expense),
        ("Commute", CategoryKind::Expense),
        ("Utilities", CategoryKind::Expense),
        ("Salary", CategoryKind::Income),
        ("Other", CategoryKind::Expense),
    ] {
        create_category(user_id, name, kind, 0.0, connection)?;
    }

    Ok(())
}

/// Wipe the user's transactions, categories, payment modes, and bank
/// accounts, then reseed the defaults.
///
/// The wipe and reseed happen inside one SQL transaction.
///
/// # Errors
/// This function will return a:
/// - [Error::UserNotFound] if there is no such user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn reset_account(user_id: UserId, connection: &Connection) -> Result<(), Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    get_user(user_id, &sql_transaction)?;

    delete_all_transactions(user_id, &sql_transaction)?;
    delete_all_categories(user_id, &sql_transaction)?;
    delete_all_payment_modes(user_id, &sql_transaction)?;
    seed_defaults(user_id, &sql_transaction)?;

    sql_transaction.commit()?;

    Ok(())
}

/// Delete the user and everything they own.
///
/// # Errors
/// This function will return a:
/// - [Error::UserNotFound] if there is no such user,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_account(user_id: UserId, connection: &Connection) -> Result<(), Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    get_user(user_id, &sql_transaction)?;

    delete_all_transactions(user_id, &sql_transaction)?;
    delete_all_categories(user_id, &sql_transaction)?;
    delete_all_payment_modes(user_id, &sql_transaction)?;
    sql_transaction.execute("DELETE FROM user WHERE id = ?1", [user_id])?;

    sql_transaction.commit()?;

    Ok(())
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// A route handler for the account summary.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_account_summary_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match get_account_summary(user_id, &connection) {
        Ok(summary) => Json(summary).into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for wiping the caller's data and reseeding the defaults.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn reset_account_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match reset_account(user_id, &connection) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response(),
    }
}

/// A route handler for deleting the caller's account and all of their data.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn delete_account_endpoint(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Response {
    let connection = state.db_connection.lock().unwrap();

    match delete_account(user_id, &connection) {
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
        bank_account::get_bank_accounts,
        category::get_categories,
        database_id::UserId,
        db::initialize,
        payment_mode::get_payment_modes,
        transaction::{TransactionForm, TransactionKind, add_transaction, get_transactions},
        user::{get_user, register_user},
    };

    use super::{delete_account, get_account_summary, reset_account};

    fn get_test_connection() -> (Connection, UserId) {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let user = register_user("foo@bar.baz", &conn).unwrap();

        (conn, user.id)
    }

    fn add_seeded_transactions(user_id: UserId, conn: &Connection) {
        let categories = get_categories(user_id, conn).unwrap();
        let salary = categories
            .iter()
            .find(|category| category.name == "Salary")
            .unwrap();
        let groceries = categories
            .iter()
            .find(|category| category.name == "Groceries")
            .unwrap();
        let modes = get_payment_modes(user_id, conn).unwrap();
        let bank = modes.iter().find(|mode| mode.name == "Bank").unwrap();
        let cash = modes.iter().find(|mode| mode.name == "Cash").unwrap();

        add_transaction(
            user_id,
            TransactionForm {
                amount: 1000.0,
                kind: TransactionKind::Income,
                category_id: Some(salary.id),
                payment_mode_id: bank.id,
                transfer_to_id: None,
                remark: String::new(),
                date: None,
            },
            conn,
        )
        .unwrap();
        add_transaction(
            user_id,
            TransactionForm {
                amount: 150.0,
                kind: TransactionKind::Expense,
                category_id: Some(groceries.id),
                payment_mode_id: cash.id,
                transfer_to_id: None,
                remark: String::new(),
                date: None,
            },
            conn,
        )
        .unwrap();
    }

    #[test]
    fn summary_rolls_up_the_books() {
        let (conn, user_id) = get_test_connection();
        add_seeded_transactions(user_id, &conn);

        let summary = get_account_summary(user_id, &conn).unwrap();

        assert_eq!(summary.net_balance, 850.0);
        assert_eq!(summary.total_spent, 150.0);
        assert_eq!(summary.total_expenditure, 150.0);
        assert_eq!(summary.total_budget, 0.0);

        let bank = summary
            .payment_modes
            .iter()
            .find(|mode| mode.name == "Bank")
            .unwrap();
        let cash = summary
            .payment_modes
            .iter()
            .find(|mode| mode.name == "Cash")
            .unwrap();
        // The Bank mode reports its linked account's balance.
        assert_eq!(bank.balance, 1000.0);
        assert_eq!(cash.balance, -150.0);
    }

    #[test]
    fn summary_for_a_fresh_account_is_all_zeroes() {
        let (conn, user_id) = get_test_connection();

        let summary = get_account_summary(user_id, &conn).unwrap();

        assert_eq!(summary.net_balance, 0.0);
        assert_eq!(summary.total_spent, 0.0);
        assert_eq!(summary.total_budget, 0.0);
        assert_eq!(summary.total_expenditure, 0.0);
        assert_eq!(summary.payment_modes.len(), 2);
    }

    #[test]
    fn reset_wipes_and_reseeds() {
        let (conn, user_id) = get_test_connection();
        add_seeded_transactions(user_id, &conn);

        reset_account(user_id, &conn).unwrap();

        assert!(get_transactions(user_id, &conn).unwrap().is_empty());
        assert_eq!(get_categories(user_id, &conn).unwrap().len(), 6);
        assert_eq!(get_payment_modes(user_id, &conn).unwrap().len(), 2);
        assert_eq!(get_bank_accounts(user_id, &conn).unwrap().len(), 1);

        let summary = get_account_summary(user_id, &conn).unwrap();
        assert_eq!(summary.net_balance, 0.0);
        for mode in summary.payment_modes {
            assert_eq!(mode.balance, 0.0);
        }
    }

    #[test]
    fn reset_requires_an_existing_user() {
        let (conn, _) = get_test_connection();

        assert_eq!(reset_account(1337, &conn), Err(Error::UserNotFound));
    }

    #[test]
    fn delete_account_removes_everything() {
        let (conn, user_id) = get_test_connection();
        add_seeded_transactions(user_id, &conn);

        delete_account(user_id, &conn).unwrap();

        assert_eq!(get_user(user_id, &conn), Err(Error::UserNotFound));
        assert!(get_transactions(user_id, &conn).unwrap().is_empty());
        assert!(get_categories(user_id, &conn).unwrap().is_empty());
        assert!(get_payment_modes(user_id, &conn).unwrap().is_empty());
        assert!(get_bank_accounts(user_id, &conn).unwrap().is_empty());
    }
}
