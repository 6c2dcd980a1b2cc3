//! Defines the app level error type and its mapping to JSON API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The request did not carry a valid user identity.
    ///
    /// The identity layer in front of this service forwards the verified
    /// user id in the `X-User-Id` header; requests without it are rejected.
    #[error("the request did not carry a valid user identity")]
    MissingUserId,

    /// The transaction id did not match a transaction owned by the caller.
    ///
    /// Lookups filter by id and user, so this covers both a missing row and
    /// a row owned by someone else. The two cases are deliberately not
    /// distinguishable from the response.
    #[error("the transaction could not be found")]
    TransactionNotFound,

    /// The category id did not match a category owned by the caller.
    #[error("the category could not be found")]
    CategoryNotFound,

    /// The payment mode id did not match a payment mode owned by the caller.
    #[error("the payment mode could not be found")]
    PaymentModeNotFound,

    /// A bank-linked payment mode pointed at a bank account that does not
    /// exist or is not owned by the caller.
    #[error("the bank account could not be found")]
    BankAccountNotFound,

    /// The user id did not match a registered user.
    #[error("the user could not be found")]
    UserNotFound,

    /// An income or expense transaction was submitted without a category.
    #[error("a category is required for income and expense transactions")]
    CategoryRequired,

    /// A transfer was submitted without a destination payment mode.
    #[error("a destination payment mode is required for transfers")]
    TransferDestinationRequired,

    /// The amount was zero, negative, or not a finite number.
    ///
    /// Amounts are stored as positive magnitudes; the direction of the
    /// balance effect is derived from the transaction type, never the sign.
    #[error("the amount must be a positive number")]
    InvalidAmount,

    /// A payment mode of type Bank was created without a bank account link,
    /// or a mode of any other type was created with one.
    #[error("bank accounts may only be linked to payment modes of type Bank")]
    InvalidBankAccountLink,

    /// A bank account could not be deleted because a payment mode still
    /// links to it.
    #[error("the bank account is still linked to a payment mode")]
    BankAccountInUse,

    /// The email address is already registered.
    #[error("the email address is already registered")]
    DuplicateEmail,

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLock,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl Error {
    /// A stable machine-readable code for the error, included in the JSON
    /// response body so clients do not have to parse the message text.
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingUserId => "NOT_AUTHORIZED",
            Error::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            Error::CategoryNotFound => "CATEGORY_NOT_FOUND",
            Error::PaymentModeNotFound => "PAYMENT_MODE_NOT_FOUND",
            Error::BankAccountNotFound => "BANK_ACCOUNT_NOT_FOUND",
            Error::UserNotFound => "USER_NOT_FOUND",
            Error::CategoryRequired => "CATEGORY_IS_REQUIRED",
            Error::TransferDestinationRequired => "TRANSFER_TO_IS_REQUIRED",
            Error::InvalidAmount => "INVALID_AMOUNT",
            Error::InvalidBankAccountLink => "INVALID_BANK_ACCOUNT_LINK",
            Error::BankAccountInUse => "BANK_ACCOUNT_IN_USE",
            Error::DuplicateEmail => "EMAIL_ALREADY_EXISTS",
            Error::DatabaseLock | Error::SqlError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("user.email") =>
            {
                Error::DuplicateEmail
            }
            error => Error::SqlError(error),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = match &self {
            Error::MissingUserId => StatusCode::UNAUTHORIZED,
            Error::TransactionNotFound
            | Error::CategoryNotFound
            | Error::PaymentModeNotFound
            | Error::BankAccountNotFound
            | Error::UserNotFound => StatusCode::NOT_FOUND,
            Error::CategoryRequired
            | Error::TransferDestinationRequired
            | Error::InvalidAmount
            | Error::InvalidBankAccountLink => StatusCode::BAD_REQUEST,
            Error::BankAccountInUse | Error::DuplicateEmail => StatusCode::CONFLICT,
            Error::DatabaseLock | Error::SqlError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal failures are logged on the server and never exposed with
        // their underlying detail.
        let message = if status_code == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("An unexpected error occurred: {}", self);
            "an unexpected error occurred, check the server logs for more details".to_owned()
        } else {
            self.to_string()
        };

        (
            status_code,
            Json(json!({
                "error": {
                    "code": self.code(),
                    "message": message,
                }
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use super::Error;

    #[test]
    fn not_found_family_maps_to_404() {
        for error in [
            Error::TransactionNotFound,
            Error::CategoryNotFound,
            Error::PaymentModeNotFound,
            Error::BankAccountNotFound,
        ] {
            let response = error.into_response();

            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn missing_identity_maps_to_401() {
        let response = Error::MissingUserId.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn conflict_family_maps_to_409() {
        for error in [Error::BankAccountInUse, Error::DuplicateEmail] {
            let response = error.into_response();

            assert_eq!(response.status(), StatusCode::CONFLICT);
        }
    }

    #[test]
    fn sql_error_maps_to_500() {
        let response = Error::SqlError(rusqlite::Error::QueryReturnedNoRows).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
