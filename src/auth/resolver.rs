use sqlx::{Pool, Sqlite};
use tracing::{instrument, warn};

use crate::db::get_override_names;
use crate::error::AppError;

use super::{EffectivePermissions, Permission, Principal, Role, resolve};

/// Loads the principal's override rows and folds them into its effective set.
///
/// Computed on every call: an override granted or revoked between two requests
/// is visible on the second one.
#[instrument(skip_all, fields(principal_id = principal.id, role = %principal.role))]
pub async fn effective_permissions(
    pool: &Pool<Sqlite>,
    principal: &Principal,
) -> Result<EffectivePermissions, AppError> {
    match principal.role {
        Role::Administrator => Ok(EffectivePermissions::All),
        Role::Standard => {
            let names = get_override_names(pool, principal.id).await?;
            let overrides = names.iter().filter_map(|name| match name.parse::<Permission>() {
                Ok(permission) => Some(permission),
                Err(_) => {
                    warn!(permission = %name, "Ignoring override for permission outside the catalog");
                    None
                }
            });

            Ok(resolve(principal.role, overrides))
        }
    }
}
