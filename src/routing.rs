//! Application router configuration.

use axum::{
    Json, Router, middleware,
    routing::{delete, get, post, put},
};
use serde_json::json;

use crate::{
    AppState,
    account::{delete_account_endpoint, get_account_summary_endpoint, reset_account_endpoint},
    bank_account::{
        create_bank_account_endpoint, delete_bank_account_endpoint, get_bank_accounts_endpoint,
        update_bank_account_endpoint,
    },
    category::{
        create_category_endpoint, delete_category_endpoint, get_categories_endpoint,
        update_category_endpoint,
    },
    endpoints,
    logging::logging_middleware,
    payment_mode::{
        create_payment_mode_endpoint, delete_payment_mode_endpoint, get_payment_modes_endpoint,
        update_payment_mode_endpoint,
    },
    transaction::{
        create_transaction_endpoint, delete_transaction_endpoint, get_transactions_endpoint,
        update_transaction_endpoint,
    },
    user::register_user_endpoint,
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(get_health))
        .route(endpoints::USERS, post(register_user_endpoint))
        .route(
            endpoints::TRANSACTIONS,
            get(get_transactions_endpoint).post(create_transaction_endpoint),
        )
        .route(endpoints::TRANSACTION, put(update_transaction_endpoint))
        .route(endpoints::TRANSACTION, delete(delete_transaction_endpoint))
        .route(
            endpoints::CATEGORIES,
            get(get_categories_endpoint).post(create_category_endpoint),
        )
        .route(endpoints::CATEGORY, put(update_category_endpoint))
        .route(endpoints::CATEGORY, delete(delete_category_endpoint))
        .route(
            endpoints::PAYMENT_MODES,
            get(get_payment_modes_endpoint).post(create_payment_mode_endpoint),
        )
        .route(endpoints::PAYMENT_MODE, put(update_payment_mode_endpoint))
        .route(
            endpoints::PAYMENT_MODE,
            delete(delete_payment_mode_endpoint),
        )
        .route(
            endpoints::BANK_ACCOUNTS,
            get(get_bank_accounts_endpoint).post(create_bank_account_endpoint),
        )
        .route(endpoints::BANK_ACCOUNT, put(update_bank_account_endpoint))
        .route(
            endpoints::BANK_ACCOUNT,
            delete(delete_bank_account_endpoint),
        )
        .route(endpoints::ACCOUNT_SUMMARY, get(get_account_summary_endpoint))
        .route(endpoints::ACCOUNT_RESET, post(reset_account_endpoint))
        .route(endpoints::ACCOUNT, delete(delete_account_endpoint))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

/// A route handler for checking that the server is up.
async fn get_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use rusqlite::Connection;
    use serde_json::{Value, json};

    use crate::{AppState, auth::USER_ID_HEADER, endpoints};

    use super::build_router;

    fn new_test_server() -> TestServer {
        let state =
            AppState::new(Connection::open_in_memory().unwrap()).expect("Could not create app");

        TestServer::new(build_router(state))
    }

    async fn register(server: &TestServer, email: &str) -> i64 {
        let response = server
            .post(endpoints::USERS)
            .json(&json!({ "email": email }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);

        response.json::<Value>()["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn health_check_is_ok() {
        let server = new_test_server();

        let response = server.get(endpoints::HEALTH).await;

        response.assert_status_ok();
    }

    #[tokio::test]
    async fn requests_without_identity_are_rejected() {
        let server = new_test_server();

        let response = server.get(endpoints::TRANSACTIONS).await;

        response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.json::<Value>()["error"]["code"],
            "NOT_AUTHORIZED"
        );
    }

    #[tokio::test]
    async fn register_then_record_a_transaction() {
        let server = new_test_server();
        let user_id = register(&server, "foo@bar.baz").await;

        let categories = server
            .get(endpoints::CATEGORIES)
            .add_header(USER_ID_HEADER, user_id.to_string())
            .await
            .json::<Value>();
        let groceries = categories
            .as_array()
            .unwrap()
            .iter()
            .find(|category| category["name"] == "Groceries")
            .unwrap();
        let modes = server
            .get(endpoints::PAYMENT_MODES)
            .add_header(USER_ID_HEADER, user_id.to_string())
            .await
            .json::<Value>();
        let cash = modes
            .as_array()
            .unwrap()
            .iter()
            .find(|mode| mode["name"] == "Cash")
            .unwrap();

        let response = server
            .post(endpoints::TRANSACTIONS)
            .add_header(USER_ID_HEADER, user_id.to_string())
            .json(&json!({
                "amount": 42.5,
                "kind": "Expense",
                "category_id": groceries["id"],
                "payment_mode_id": cash["id"],
                "remark": "weekly shop",
            }))
            .await;

        response.assert_status(axum::http::StatusCode::CREATED);
        let body = response.json::<Value>();
        assert_eq!(body["amount"], 42.5);
        assert_eq!(body["category_name"], "Groceries");
        assert_eq!(body["payment_mode_name"], "Cash");
    }

    #[tokio::test]
    async fn users_cannot_touch_each_others_data() {
        let server = new_test_server();
        let owner = register(&server, "foo@bar.baz").await;
        let intruder = register(&server, "other@bar.baz").await;

        let categories = server
            .get(endpoints::CATEGORIES)
            .add_header(USER_ID_HEADER, owner.to_string())
            .await
            .json::<Value>();
        let category_id = categories.as_array().unwrap()[0]["id"].as_i64().unwrap();

        let response = server
            .delete(&endpoints::format_endpoint(
                endpoints::CATEGORY,
                category_id,
            ))
            .add_header(USER_ID_HEADER, intruder.to_string())
            .await;

        response.assert_status(axum::http::StatusCode::NOT_FOUND);
        assert_eq!(
            response.json::<Value>()["error"]["code"],
            "CATEGORY_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let server = new_test_server();
        let user_id = register(&server, "foo@bar.baz").await;

        let modes = server
            .get(endpoints::PAYMENT_MODES)
            .add_header(USER_ID_HEADER, user_id.to_string())
            .await
            .json::<Value>();
        let cash = &modes.as_array().unwrap()[1];

        let response = server
            .post(endpoints::TRANSACTIONS)
            .add_header(USER_ID_HEADER, user_id.to_string())
            .json(&json!({
                "amount": -1.0,
                "kind": "Expense",
                "payment_mode_id": cash["id"],
            }))
            .await;

        response.assert_status(axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"]["code"], "INVALID_AMOUNT");
    }
}
