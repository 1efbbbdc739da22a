use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{Instrument, error, info, instrument};

use crate::db::find_principal;
use crate::error::AppError;

use super::{AccessContext, CredentialError, TokenAuthority, bearer_token, effective_permissions};

/// Turns an `Authorization` header into a fully resolved access context.
///
/// The token is only trusted for the principal id; name, role and permissions
/// come from a fresh store lookup.
#[instrument(skip_all)]
pub async fn verify_bearer(
    pool: &Pool<Sqlite>,
    tokens: &TokenAuthority,
    authorization: Option<&str>,
) -> Result<AccessContext, AppError> {
    let token = bearer_token(authorization)?;
    let principal_id = tokens.verify(token)?;

    let principal = find_principal(pool, principal_id)
        .await?
        .ok_or(CredentialError::PrincipalNotFound)?;

    let permissions = effective_permissions(pool, &principal).await?;

    Ok(AccessContext {
        principal,
        permissions,
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AccessContext {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let rocket = request.rocket();
        let (Some(pool), Some(tokens)) = (
            rocket.state::<SqlitePool>(),
            rocket.state::<TokenAuthority>(),
        ) else {
            error!("Database pool or token authority not found in managed state");
            return Outcome::Error((
                Status::InternalServerError,
                AppError::Internal("Access layer is not configured".to_string()),
            ));
        };

        let authorization = request.headers().get_one("Authorization");

        match verify_bearer(pool, tokens, authorization)
            .instrument(tracing::info_span!("access_context_guard"))
            .await
        {
            Ok(ctx) => {
                info!(
                    principal_id = ctx.principal.id,
                    role = %ctx.principal.role,
                    "Principal authenticated via bearer credential"
                );
                Outcome::Success(ctx)
            }
            Err(err) => Outcome::Error((err.status_code(), err)),
        }
    }
}
