//! Authentication extractor.
//!
//! Identity issuance lives in the external accounts service; what reaches
//! the shop is a bearer token signed with the shared HS256 secret. The
//! [`CurrentUser`] extractor verifies it and makes the identity available to
//! handlers - any handler taking `CurrentUser` is authenticated, anything
//! else is anonymous.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use certdeck_core::UserId;

use crate::error::AppError;
use crate::state::AppState;

/// Claims carried by an accounts-service token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id (subject).
    pub sub: String,
    /// User's email address.
    pub email: String,
    /// Expiry timestamp.
    pub exp: i64,
    /// Issued-at timestamp.
    pub iat: i64,
}

/// The authenticated identity on a request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Check if already extracted earlier in the request
        if let Some(user) = parts.extensions.get::<Self>() {
            return Ok(user.clone());
        }

        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthenticated)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthenticated)?;

        let claims = decode_token(token, &state.config().jwt_secret)?;
        let id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AppError::Unauthenticated)?;

        let user = Self {
            id,
            email: claims.email,
        };
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

/// Verify a token and return its claims.
///
/// # Errors
///
/// Returns `AppError::Unauthenticated` for anything wrong with the token -
/// bad signature, expired, malformed. Callers never learn which.
pub fn decode_token(token: &str, secret: &SecretString) -> Result<Claims, AppError> {
    let key = DecodingKey::from_secret(secret.expose_secret().as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "bearer token rejected");
        AppError::Unauthenticated
    })?;
    Ok(data.claims)
}

/// Sign a token for a user.
///
/// Counterpart of [`decode_token`] used by the test suites and local
/// tooling; production tokens are minted by the accounts service with the
/// same claims shape.
///
/// # Errors
///
/// Returns `AppError::Internal` if signing fails.
pub fn sign_token(
    user_id: UserId,
    email: &str,
    secret: &SecretString,
    valid_for: chrono::Duration,
) -> Result<String, AppError> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_owned(),
        exp: (now + valid_for).timestamp(),
        iat: now.timestamp(),
    };
    let key = EncodingKey::from_secret(secret.expose_secret().as_bytes());
    encode(&Header::new(Algorithm::HS256), &claims, &key)
        .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn secret() -> SecretString {
        SecretString::from("kkQ2mPz8vN4xR7wT1bY6uJ3eH9sL5aD0")
    }

    #[test]
    fn test_sign_and_decode_roundtrip() {
        let token =
            sign_token(UserId::new(42), "buyer@example.com", &secret(), Duration::hours(1))
                .expect("sign");
        let claims = decode_token(&token, &secret()).expect("decode");
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.email, "buyer@example.com");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token =
            sign_token(UserId::new(42), "buyer@example.com", &secret(), Duration::hours(1))
                .expect("sign");
        let other = SecretString::from("a0D5La9Hs3eJ6uY1bT7wR4xN8zPm2Qkk");
        assert!(matches!(
            decode_token(&token, &other),
            Err(AppError::Unauthenticated)
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = sign_token(
            UserId::new(42),
            "buyer@example.com",
            &secret(),
            Duration::hours(-2),
        )
        .expect("sign");
        assert!(matches!(
            decode_token(&token, &secret()),
            Err(AppError::Unauthenticated)
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            decode_token("not.a.jwt", &secret()),
            Err(AppError::Unauthenticated)
        ));
    }
}
