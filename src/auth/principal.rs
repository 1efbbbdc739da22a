use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::{EffectivePermissions, Role};

/// An operator account, as loaded fresh from the credential store.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Principal {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPrincipal {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
}

impl TryFrom<DbPrincipal> for Principal {
    type Error = AppError;

    fn try_from(row: DbPrincipal) -> Result<Self, Self::Error> {
        let role = row.role.parse::<Role>().map_err(|_| {
            AppError::Internal(format!(
                "Principal {} has unknown role '{}'",
                row.id, row.role
            ))
        })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            email: row.email,
            role,
        })
    }
}

/// What the access layer attaches to a request once the bearer credential checks out.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub principal: Principal,
    pub permissions: EffectivePermissions,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PrincipalData {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub permissions: Vec<String>,
}

impl PrincipalData {
    pub fn new(principal: &Principal, permissions: &EffectivePermissions) -> Self {
        Self {
            id: principal.id,
            name: principal.name.clone(),
            email: principal.email.clone(),
            role: principal.role.to_string(),
            permissions: permissions.names(),
        }
    }
}

impl From<&AccessContext> for PrincipalData {
    fn from(ctx: &AccessContext) -> Self {
        Self::new(&ctx.principal, &ctx.permissions)
    }
}
