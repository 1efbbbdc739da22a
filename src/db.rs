use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::auth::{DbPrincipal, Permission, Principal, Role};
use crate::error::{AppError, is_unique_violation};
use crate::models::{EducationLevel, PermissionInfo};

const PRINCIPAL_COLUMNS: &str = "SELECT p.id, p.name, p.email, r.name AS role
     FROM principals p
     JOIN roles r ON r.id = p.role_id";

#[instrument(skip(pool))]
pub async fn find_principal(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Principal>, AppError> {
    let row = sqlx::query_as::<_, DbPrincipal>(&format!("{PRINCIPAL_COLUMNS} WHERE p.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Principal::try_from).transpose()
}

#[instrument(skip(pool))]
pub async fn get_principal(pool: &Pool<Sqlite>, id: i64) -> Result<Principal, AppError> {
    find_principal(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Principal with id {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn list_principals(pool: &Pool<Sqlite>) -> Result<Vec<Principal>, AppError> {
    let rows = sqlx::query_as::<_, DbPrincipal>(&format!("{PRINCIPAL_COLUMNS} ORDER BY p.id"))
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(Principal::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: i64,
    password_hash: String,
}

/// Verifies an email/password pair. Unknown emails and wrong passwords are indistinguishable.
#[instrument(skip_all, fields(email))]
pub async fn authenticate_principal(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<Principal>, AppError> {
    info!("Authenticating principal");
    let row = sqlx::query_as::<_, CredentialRow>(
        "SELECT id, password_hash FROM principals WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    match bcrypt::verify(password, &row.password_hash) {
        Ok(true) => find_principal(pool, row.id).await,
        Ok(false) => Ok(None),
        Err(err) => {
            warn!(principal_id = row.id, error = %err, "Stored password hash could not be verified");
            Ok(None)
        }
    }
}

pub struct NewPrincipal<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub role: Role,
}

async fn insert_principal(
    conn: &mut SqliteConnection,
    principal: &NewPrincipal<'_>,
    cost: u32,
) -> Result<i64, AppError> {
    let password_hash = bcrypt::hash(principal.password, cost)?;

    let res = sqlx::query(
        "INSERT INTO principals (name, email, password_hash, role_id)
         SELECT ?, ?, ?, r.id FROM roles r WHERE r.name = ?",
    )
    .bind(principal.name)
    .bind(principal.email)
    .bind(password_hash)
    .bind(principal.role.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::Conflict(format!(
                "A principal with email '{}' already exists",
                principal.email
            ))
        } else {
            AppError::Database(err)
        }
    })?;

    if res.rows_affected() == 0 {
        return Err(AppError::Internal(format!(
            "Role '{}' is missing from the roles table",
            principal.role
        )));
    }

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(email = principal.email, role = %principal.role))]
pub async fn create_principal(
    pool: &Pool<Sqlite>,
    principal: &NewPrincipal<'_>,
    cost: u32,
) -> Result<i64, AppError> {
    info!("Creating principal");
    let mut conn = pool.acquire().await?;
    insert_principal(&mut conn, principal, cost).await
}

async fn count_administrators(conn: &mut SqliteConnection) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM principals p
         JOIN roles r ON r.id = p.role_id
         WHERE r.name = ?",
    )
    .bind(Role::Administrator.as_str())
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn has_administrator(pool: &Pool<Sqlite>) -> Result<bool, AppError> {
    let mut conn = pool.acquire().await?;
    Ok(count_administrators(&mut conn).await? > 0)
}

/// Creates the very first principal as an administrator.
///
/// The administrator count and the insert share one transaction so a second
/// bootstrap racing the first cannot slip past the check.
#[instrument(skip_all, fields(email))]
pub async fn bootstrap_administrator(
    pool: &Pool<Sqlite>,
    name: &str,
    email: &str,
    password: &str,
    cost: u32,
) -> Result<i64, AppError> {
    let mut tx = pool.begin().await?;

    if count_administrators(&mut tx).await? > 0 {
        tx.rollback().await?;
        return Err(AppError::forbidden(
            "An administrator already exists; bootstrap is disabled",
        ));
    }

    let principal = NewPrincipal {
        name,
        email,
        password,
        role: Role::Administrator,
    };
    let id = insert_principal(&mut tx, &principal, cost).await?;
    tx.commit().await?;

    info!(principal_id = id, "Bootstrapped first administrator");
    Ok(id)
}

/// Deletes a principal unless it is the caller or the last administrator standing.
#[instrument(skip(pool))]
pub async fn delete_principal(
    pool: &Pool<Sqlite>,
    caller_id: i64,
    target_id: i64,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let target = sqlx::query_as::<_, DbPrincipal>(&format!("{PRINCIPAL_COLUMNS} WHERE p.id = ?"))
        .bind(target_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Principal::try_from)
        .transpose()?
        .ok_or_else(|| AppError::NotFound(format!("Principal with id {} not found", target_id)))?;

    if target.id == caller_id {
        return Err(AppError::forbidden("Principals cannot delete themselves"));
    }

    if target.role == Role::Administrator && count_administrators(&mut tx).await? <= 1 {
        return Err(AppError::forbidden(
            "The last remaining administrator cannot be deleted",
        ));
    }

    sqlx::query("DELETE FROM principals WHERE id = ?")
        .bind(target_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(principal_id = target_id, "Principal deleted");
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_override_names(
    pool: &Pool<Sqlite>,
    principal_id: i64,
) -> Result<Vec<String>, AppError> {
    let names = sqlx::query_scalar::<_, String>(
        "SELECT p.name FROM principal_permissions pp
         JOIN permissions p ON p.id = pp.permission_id
         WHERE pp.principal_id = ?
         ORDER BY p.name",
    )
    .bind(principal_id)
    .fetch_all(pool)
    .await?;

    Ok(names)
}

/// Replaces a principal's override grants with exactly `permissions`.
#[instrument(skip(pool))]
pub async fn replace_overrides(
    pool: &Pool<Sqlite>,
    target_id: i64,
    granted_by: i64,
    permissions: &[Permission],
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM principals WHERE id = ?")
        .bind(target_id)
        .fetch_optional(&mut *tx)
        .await?;

    if exists.is_none() {
        return Err(AppError::NotFound(format!(
            "Principal with id {} not found",
            target_id
        )));
    }

    sqlx::query("DELETE FROM principal_permissions WHERE principal_id = ?")
        .bind(target_id)
        .execute(&mut *tx)
        .await?;

    for permission in permissions {
        sqlx::query(
            "INSERT OR IGNORE INTO principal_permissions (principal_id, permission_id, granted_by)
             SELECT ?, p.id, ? FROM permissions p WHERE p.name = ?",
        )
        .bind(target_id)
        .bind(granted_by)
        .bind(permission.as_str())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(count = permissions.len(), "Permission overrides replaced");
    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_permission_catalog(pool: &Pool<Sqlite>) -> Result<Vec<PermissionInfo>, AppError> {
    let rows = sqlx::query_as::<_, PermissionInfo>(
        "SELECT id, name, description FROM permissions ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn list_education_levels(pool: &Pool<Sqlite>) -> Result<Vec<EducationLevel>, AppError> {
    let rows = sqlx::query_as::<_, EducationLevel>(
        "SELECT id, name FROM education_levels ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
