use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

/// Claims carried by a bearer credential. Only `sub` is trusted, and only as a lookup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Missing bearer credential")]
    Missing,
    #[error("Invalid credential")]
    Invalid,
    #[error("Credential has expired")]
    Expired,
    #[error("Principal no longer exists")]
    PrincipalNotFound,
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::Unauthenticated(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and checks HS256 bearer credentials with a fixed time-to-live.
pub struct TokenAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenAuthority {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, principal_id: i64) -> Result<IssuedToken, AppError> {
        self.issue_at(principal_id, Utc::now())
    }

    pub fn issue_at(
        &self,
        principal_id: i64,
        issued_at: DateTime<Utc>,
    ) -> Result<IssuedToken, AppError> {
        let expires_at = issued_at + self.ttl;
        let claims = Claims {
            sub: principal_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Checks signature and expiry and returns the principal id the credential points at.
    pub fn verify(&self, token: &str) -> Result<i64, CredentialError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => CredentialError::Expired,
                _ => CredentialError::Invalid,
            },
        )?;

        data.claims
            .sub
            .parse::<i64>()
            .map_err(|_| CredentialError::Invalid)
    }
}

/// Extracts the credential from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, CredentialError> {
    let header = header.ok_or(CredentialError::Missing)?;
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(CredentialError::Invalid)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(CredentialError::Invalid);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(CredentialError::Missing);
    }

    Ok(token)
}
