//! Extracts the authenticated user's identity from the request.
//!
//! Authentication itself (passwords, OTP delivery, third party sign-in) is
//! handled by the identity layer deployed in front of this service, which
//! forwards the verified user id in the `X-User-Id` header. Every handler
//! that touches user-owned data takes an [AuthenticatedUser] and passes the
//! id down to the database functions, which filter all reads and writes by
//! it.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{Error, database_id::UserId};

/// The request header carrying the verified user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The id of the caller, as asserted by the upstream identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|text| text.parse::<UserId>().ok())
            .map(AuthenticatedUser)
            .ok_or(Error::MissingUserId)
    }
}
