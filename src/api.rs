use chrono::{DateTime, Utc};
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use rocket::{Request, catch, delete, get, post, put};
use serde_json::{Value, json};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::auth::{
    AccessContext, AccessGate, Permission, PrincipalData, Role, TokenAuthority,
    effective_permissions,
};
use crate::db::{
    NewPrincipal, authenticate_principal, bootstrap_administrator, create_principal,
    delete_principal, get_override_names, get_principal, has_administrator, list_education_levels,
    list_permission_catalog, list_principals, replace_overrides,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{EducationLevel, PermissionInfo, SubjectInput, SubjectRecord};
use crate::photos::PhotoStore;
use crate::records::{create_record, delete_record, get_record, list_records, update_record};
use crate::validation::JsonValidateExt;

type ApiResult<T> = Result<T, AppError>;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "must be a valid email address"))]
    email: String,
    #[validate(length(min = 1, message = "is required"))]
    password: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
    pub principal: PrincipalData,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    db: &State<Pool<Sqlite>>,
    tokens: &State<TokenAuthority>,
) -> ApiResult<Json<LoginResponse>> {
    let login = login.validate_custom()?;

    let principal = authenticate_principal(db, &login.email, &login.password)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Invalid credentials".to_string()))?;

    let permissions = effective_permissions(db, &principal).await?;
    let issued = tokens.issue(principal.id)?;

    info!(principal_id = principal.id, "Login successful");

    Ok(Json(LoginResponse {
        token: issued.token,
        token_type: "Bearer".to_string(),
        expires_at: issued.expires_at,
        expires_in: tokens.ttl().num_seconds(),
        principal: PrincipalData::new(&principal, &permissions),
    }))
}

#[get("/me")]
pub async fn api_me(auth: Result<AccessContext, AppError>) -> ApiResult<Json<PrincipalData>> {
    let ctx = auth?;
    Ok(Json(PrincipalData::from(&ctx)))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SetupStatus {
    pub has_administrator: bool,
}

#[get("/setup/status")]
pub async fn api_setup_status(db: &State<Pool<Sqlite>>) -> ApiResult<Json<SetupStatus>> {
    Ok(Json(SetupStatus {
        has_administrator: has_administrator(db).await?,
    }))
}

#[derive(Deserialize, Validate)]
pub struct BootstrapRequest {
    #[validate(length(min = 1, message = "is required"))]
    name: String,
    #[validate(email(message = "must be a valid email address"))]
    email: String,
    #[validate(length(min = 6, message = "must be at least 6 characters"))]
    password: String,
}

#[post("/setup/bootstrap", data = "<request>")]
pub async fn api_bootstrap(
    request: Json<BootstrapRequest>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<Json<PrincipalData>> {
    let request = request.validate_custom()?;

    let id = bootstrap_administrator(
        db,
        request.name.trim(),
        request.email.trim(),
        &request.password,
        config.password_hash_cost,
    )
    .await?;

    let principal = get_principal(db, id).await?;
    let permissions = effective_permissions(db, &principal).await?;
    Ok(Json(PrincipalData::new(&principal, &permissions)))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreatedResponse {
    pub id: i64,
}

#[get("/records")]
pub async fn api_list_records(
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
    photos: &State<PhotoStore>,
) -> ApiResult<Json<Vec<SubjectRecord>>> {
    auth?;
    Ok(Json(list_records(db, photos).await?))
}

#[get("/records/<id>")]
pub async fn api_get_record(
    id: i64,
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
    photos: &State<PhotoStore>,
) -> ApiResult<Json<SubjectRecord>> {
    auth?;
    Ok(Json(get_record(db, photos, id).await?))
}

#[post("/records", data = "<input>")]
pub async fn api_create_record(
    input: Json<SubjectInput>,
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    AccessGate::require_permission(Permission::RecordCreate).admit(auth)?;

    let id = create_record(db, &input).await?;

    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}

#[put("/records/<id>", data = "<input>")]
pub async fn api_update_record(
    id: i64,
    input: Json<SubjectInput>,
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
    photos: &State<PhotoStore>,
) -> ApiResult<Status> {
    AccessGate::require_permission(Permission::RecordEdit).admit(auth)?;

    update_record(db, photos, id, &input).await?;

    Ok(Status::Ok)
}

#[delete("/records/<id>")]
pub async fn api_delete_record(
    id: i64,
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
    photos: &State<PhotoStore>,
) -> ApiResult<Status> {
    AccessGate::require_permission(Permission::RecordDelete).admit(auth)?;

    delete_record(db, photos, id).await?;

    Ok(Status::Ok)
}

#[get("/education-levels")]
pub async fn api_education_levels(
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<EducationLevel>>> {
    auth?;
    Ok(Json(list_education_levels(db).await?))
}

#[derive(Deserialize, Validate)]
pub struct PrincipalRegistrationRequest {
    #[validate(length(min = 1, message = "is required"))]
    name: String,
    #[validate(email(message = "must be a valid email address"))]
    email: String,
    #[validate(length(min = 6, message = "must be at least 6 characters"))]
    password: String,
    role: Option<String>,
}

#[post("/admin/principals", data = "<registration>")]
pub async fn api_create_principal(
    registration: Json<PrincipalRegistrationRequest>,
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    AccessGate::require_role(Role::Administrator).admit(auth)?;
    let registration = registration.validate_custom()?;

    let role = match registration.role.as_deref().map(str::trim) {
        None | Some("") => Role::Standard,
        Some(role) => role.parse::<Role>()?,
    };

    let id = create_principal(
        db,
        &NewPrincipal {
            name: registration.name.trim(),
            email: registration.email.trim(),
            password: &registration.password,
            role,
        },
        config.password_hash_cost,
    )
    .await?;

    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}

#[get("/admin/principals")]
pub async fn api_list_principals(
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<PrincipalData>>> {
    AccessGate::require_role(Role::Administrator).admit(auth)?;

    let mut principals = Vec::new();
    for principal in list_principals(db).await? {
        let permissions = effective_permissions(db, &principal).await?;
        principals.push(PrincipalData::new(&principal, &permissions));
    }

    Ok(Json(principals))
}

#[delete("/admin/principals/<id>")]
pub async fn api_delete_principal(
    id: i64,
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    let ctx = AccessGate::require_role(Role::Administrator).admit(auth)?;

    delete_principal(db, ctx.principal.id, id).await?;

    Ok(Status::Ok)
}

#[get("/admin/permissions")]
pub async fn api_permission_catalog(
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<PermissionInfo>>> {
    AccessGate::require_role(Role::Administrator).admit(auth)?;
    Ok(Json(list_permission_catalog(db).await?))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PermissionAssignment {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub granted: bool,
}

#[get("/admin/principals/<id>/permissions")]
pub async fn api_principal_permissions(
    id: i64,
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<PermissionAssignment>>> {
    AccessGate::require_role(Role::Administrator).admit(auth)?;

    get_principal(db, id).await?;
    let granted = get_override_names(db, id).await?;

    let assignments = list_permission_catalog(db)
        .await?
        .into_iter()
        .map(|p| PermissionAssignment {
            granted: granted.contains(&p.name),
            id: p.id,
            name: p.name,
            description: p.description,
        })
        .collect();

    Ok(Json(assignments))
}

#[derive(Deserialize)]
pub struct OverrideRequest {
    permissions: Vec<String>,
}

#[put("/admin/principals/<id>/permissions", data = "<request>")]
pub async fn api_assign_permissions(
    id: i64,
    request: Json<OverrideRequest>,
    auth: Result<AccessContext, AppError>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    let ctx = AccessGate::require_role(Role::Administrator).admit(auth)?;

    let permissions = request
        .permissions
        .iter()
        .map(|name| name.trim().parse::<Permission>())
        .collect::<Result<Vec<_>, _>>()?;

    replace_overrides(db, id, ctx.principal.id, &permissions).await?;

    Ok(Status::Ok)
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

fn catcher_body(status: Status, kind: &str, message: &str) -> Custom<Json<Value>> {
    Custom(status, Json(json!({ "error": kind, "message": message })))
}

#[catch(400)]
pub fn bad_request_api(_req: &Request) -> Custom<Json<Value>> {
    catcher_body(Status::BadRequest, "validation_error", "Malformed request")
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<Value>> {
    catcher_body(Status::Unauthorized, "unauthenticated", "Authentication required")
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<Value>> {
    catcher_body(
        Status::Forbidden,
        "forbidden",
        "You don't have permission to perform this action",
    )
}

#[catch(404)]
pub fn not_found_api(_req: &Request) -> Custom<Json<Value>> {
    catcher_body(Status::NotFound, "not_found", "Resource not found")
}

#[catch(422)]
pub fn unprocessable_api(_req: &Request) -> Custom<Json<Value>> {
    catcher_body(
        Status::UnprocessableEntity,
        "validation_error",
        "Request body could not be parsed",
    )
}

#[catch(500)]
pub fn internal_error_api(_req: &Request) -> Custom<Json<Value>> {
    catcher_body(
        Status::InternalServerError,
        "internal_error",
        "Internal server error",
    )
}
