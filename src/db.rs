//! Database initialisation for the application's SQLite schema.

use rusqlite::{Connection, Transaction as SqlTransaction};

use crate::{
    bank_account::create_bank_account_table, category::create_category_table,
    payment_mode::create_payment_mode_table, transaction::create_transaction_table,
    user::create_user_table,
};

/// Create the tables for the application's domain models.
///
/// Table creation happens inside a single SQL transaction so a partially
/// initialised schema is never left behind.
///
/// # Errors
/// Returns an error if a table cannot be created or if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), rusqlite::Error> {
    let transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    create_user_table(&transaction)?;
    create_bank_account_table(&transaction)?;
    create_category_table(&transaction)?;
    create_payment_mode_table(&transaction)?;
    create_transaction_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}
