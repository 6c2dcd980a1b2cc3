//! The API endpoint URIs.
//!
//! For endpoints that take a parameter, e.g., '/api/transactions/{transaction_id}',
//! use [format_endpoint].

/// The route for checking that the server is up.
pub const HEALTH: &str = "/api/health";
/// The route for registering a new user.
pub const USERS: &str = "/api/users";
/// The route to list and create transactions.
pub const TRANSACTIONS: &str = "/api/transactions";
/// The route to update or delete a single transaction.
pub const TRANSACTION: &str = "/api/transactions/{transaction_id}";
/// The route to list and create categories.
pub const CATEGORIES: &str = "/api/categories";
/// The route to update or delete a single category.
pub const CATEGORY: &str = "/api/categories/{category_id}";
/// The route to list and create payment modes.
pub const PAYMENT_MODES: &str = "/api/payment_modes";
/// The route to update or delete a single payment mode.
pub const PAYMENT_MODE: &str = "/api/payment_modes/{payment_mode_id}";
/// The route to list and create bank accounts.
pub const BANK_ACCOUNTS: &str = "/api/bank_accounts";
/// The route to update or delete a single bank account.
pub const BANK_ACCOUNT: &str = "/api/bank_accounts/{bank_account_id}";
/// The route for the account summary (net balance, budgets, mode balances).
pub const ACCOUNT_SUMMARY: &str = "/api/account/summary";
/// The route for wiping the user's data and reseeding the defaults.
pub const ACCOUNT_RESET: &str = "/api/account/reset";
/// The route for deleting the user's account and all of their data.
pub const ACCOUNT: &str = "/api/account";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// A parameter is a string that starts with a left brace, followed by
/// lowercase letters or underscores, and ends with a right brace.
/// For example, in the endpoint path '/api/transactions/{transaction_id}',
/// '{transaction_id}' is the parameter.
///
/// If no parameter is found in `endpoint_path`, the function returns the
/// original `endpoint_path`.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    match (endpoint_path.find('{'), endpoint_path.find('}')) {
        (Some(param_start), Some(param_end)) if param_start < param_end => {
            let mut formatted = String::with_capacity(endpoint_path.len());
            formatted.push_str(&endpoint_path[..param_start]);
            formatted.push_str(&id.to_string());
            formatted.push_str(&endpoint_path[param_end + 1..]);
            formatted
        }
        _ => endpoint_path.to_owned(),
    }
}
