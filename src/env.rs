use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{info, warn};

/// Which environment files were applied. Logged by the caller once tracing is up.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnvReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
}

impl EnvReport {
    pub fn log(&self) {
        for path in &self.loaded {
            info!("Loaded environment from: {}", path);
        }
        for path in &self.skipped {
            warn!("Environment file {} not found, skipped", path);
        }
    }
}

pub fn load_environment() -> anyhow::Result<EnvReport> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        ["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        ["config/common.env", "config/dev.env", ".secrets.env"]
    };

    load_env_files(&env_files)
}

/// Applies each existing file in order, later files overriding earlier ones.
pub fn load_env_files(paths: &[&str]) -> anyhow::Result<EnvReport> {
    let mut report = EnvReport::default();

    for path in paths {
        if !Path::new(path).exists() {
            report.skipped.push(path.to_string());
            continue;
        }

        dotenvy::from_filename_override(path)
            .with_context(|| format!("Failed to read environment file {}", path))?;
        report.loaded.push(path.to_string());
    }

    Ok(report)
}

pub const DEFAULT_DATABASE_URL: &str = "sqlite://registry.db?mode=rwc";
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 120;
pub const DEFAULT_UPLOADS_DIR: &str = "uploads";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub password_hash_cost: u32,
    pub uploads_dir: PathBuf,
    pub public_base_url: String,
    pub otlp_endpoint: Option<String>,
    pub otlp_api_key: Option<String>,
}

fn optional_var(name: &str) -> Option<String> {
    dotenvy::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value '{}'", name, raw)),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret =
            optional_var("JWT_SECRET").ok_or_else(|| anyhow!("JWT_SECRET must be set"))?;

        let token_ttl_minutes = parsed_var("TOKEN_TTL_MINUTES", DEFAULT_TOKEN_TTL_MINUTES)?;
        if token_ttl_minutes <= 0 {
            return Err(anyhow!("TOKEN_TTL_MINUTES must be positive"));
        }

        Ok(Self {
            database_url: optional_var("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            jwt_secret,
            token_ttl_minutes,
            password_hash_cost: parsed_var("PASSWORD_HASH_COST", bcrypt::DEFAULT_COST)?,
            uploads_dir: optional_var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADS_DIR)),
            public_base_url: optional_var("PUBLIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string()),
            otlp_endpoint: optional_var("OTLP_ENDPOINT"),
            otlp_api_key: optional_var("OTLP_API_KEY"),
        })
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.token_ttl_minutes)
    }
}
