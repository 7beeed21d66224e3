//! Bearer token extraction.
//!
//! With no `AUTH_SECRET` configured the server is open. Otherwise every
//! request must carry `Authorization: Bearer <AUTH_SECRET>`.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// The bearer token, or `anonymous` when auth is disabled
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let Some(secret) = state.config.auth_secret.as_deref() else {
            return Ok(AuthUser {
                token: "anonymous".to_string(),
            });
        };

        match auth_header {
            Some(header) => {
                let token = header
                    .strip_prefix("Bearer ")
                    .ok_or(AppError::Unauthorized("invalid authorization header format"))?;
                if token != secret {
                    return Err(AppError::Unauthorized("invalid bearer token"));
                }
                Ok(AuthUser {
                    token: token.to_string(),
                })
            }
            None => Err(AppError::Unauthorized("missing authorization header")),
        }
    }
}
