use tracing::warn;

use crate::error::{AppError, Denial};

use super::{AccessContext, Permission, Role};

/// A requirement placed in front of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGate {
    Permission(Permission),
    Role(Role),
}

impl AccessGate {
    pub fn require_permission(permission: Permission) -> Self {
        AccessGate::Permission(permission)
    }

    pub fn require_role(role: Role) -> Self {
        AccessGate::Role(role)
    }

    pub fn check(&self, ctx: Option<&AccessContext>) -> Result<(), AppError> {
        let Some(ctx) = ctx else {
            return Err(AppError::Unauthenticated(
                "No authenticated principal".to_string(),
            ));
        };

        match self {
            AccessGate::Permission(permission) => match ctx.principal.role {
                Role::Administrator => Ok(()),
                Role::Standard if ctx.permissions.contains(*permission) => Ok(()),
                Role::Standard => {
                    warn!(
                        principal_id = ctx.principal.id,
                        permission = %permission,
                        "Permission denied"
                    );
                    Err(AppError::Forbidden(Denial::missing_permission(
                        permission.as_str(),
                        ctx.permissions.names(),
                    )))
                }
            },
            AccessGate::Role(role) => {
                if ctx.principal.role == *role {
                    Ok(())
                } else {
                    warn!(
                        principal_id = ctx.principal.id,
                        required_role = %role,
                        "Role requirement not met"
                    );
                    Err(AppError::forbidden(format!("Requires role '{}'", role)))
                }
            }
        }
    }

    /// Passes the guard outcome through the gate, handing back the context on success.
    pub fn admit(&self, auth: Result<AccessContext, AppError>) -> Result<AccessContext, AppError> {
        let ctx = auth?;
        self.check(Some(&ctx))?;
        Ok(ctx)
    }
}
