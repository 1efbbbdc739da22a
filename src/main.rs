#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod database;
mod db;
mod env;
mod error;
mod models;
mod photos;
mod records;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use std::str::FromStr;

use api::{
    api_assign_permissions, api_bootstrap, api_create_principal, api_create_record,
    api_delete_principal, api_delete_record, api_education_levels, api_get_record,
    api_list_principals, api_list_records, api_login, api_me, api_permission_catalog,
    api_principal_permissions, api_setup_status, api_update_record, bad_request_api,
    forbidden_api, health, internal_error_api, not_found_api, unauthorized_api,
    unprocessable_api,
};
use auth::TokenAuthority;
use database::initialize_database;
use env::{AppConfig, load_environment};
use error::AppError;
use photos::PhotoStore;
use rocket::fs::{FileServer, Options};
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Launch(Box<rocket::Error>),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Launch(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let env_report = load_environment();

    let config = AppConfig::from_env()?;
    init_tracing(&config);

    match env_report {
        Ok(report) => report.log(),
        Err(err) => warn!(error = %err, "Failed to load environment files"),
    }

    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    initialize_database(&pool).await?;

    tokio::fs::create_dir_all(&config.uploads_dir).await?;

    let _rocket = init_rocket(pool, config).await.launch().await?;

    Ok(())
}

pub async fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting personnel registry");

    let tokens = TokenAuthority::new(&config.jwt_secret, config.token_ttl());
    let photos = PhotoStore::new(config.uploads_dir.clone(), &config.public_base_url);
    let uploads = FileServer::new(config.uploads_dir.clone(), Options::Missing);

    rocket::build()
        .manage(pool)
        .manage(tokens)
        .manage(photos)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_login,
                api_me,
                api_setup_status,
                api_bootstrap,
                api_list_records,
                api_get_record,
                api_create_record,
                api_update_record,
                api_delete_record,
                api_education_levels,
                api_create_principal,
                api_list_principals,
                api_delete_principal,
                api_permission_catalog,
                api_principal_permissions,
                api_assign_permissions,
                health,
            ],
        )
        .mount("/uploads", uploads)
        .register(
            "/api",
            catchers![
                bad_request_api,
                unauthorized_api,
                forbidden_api,
                not_found_api,
                unprocessable_api,
                internal_error_api,
            ],
        )
        .attach(TelemetryFairing)
}
