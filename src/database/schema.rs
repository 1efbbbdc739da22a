use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{Permission, Role};
use crate::error::AppError;

pub const CURRENT_SCHEMA: &str = r#"
PRAGMA foreign_keys = 1;

CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS principals (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role_id INTEGER NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (role_id) REFERENCES roles (id)
);

CREATE TABLE IF NOT EXISTS permissions (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS principal_permissions (
    principal_id INTEGER NOT NULL,
    permission_id INTEGER NOT NULL,
    granted_by INTEGER,
    PRIMARY KEY (principal_id, permission_id),
    FOREIGN KEY (principal_id) REFERENCES principals (id) ON DELETE CASCADE,
    FOREIGN KEY (permission_id) REFERENCES permissions (id) ON DELETE CASCADE,
    FOREIGN KEY (granted_by) REFERENCES principals (id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS education_levels (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS subject_records (
    id INTEGER PRIMARY KEY,
    national_id TEXT NOT NULL UNIQUE CHECK (length(national_id) = 18),
    name TEXT NOT NULL,
    surname TEXT NOT NULL,
    address TEXT NOT NULL,
    birthdate DATE NOT NULL,
    education_level_id INTEGER NOT NULL,
    photo TEXT,
    latitude REAL,
    longitude REAL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (education_level_id) REFERENCES education_levels (id)
);

CREATE TABLE IF NOT EXISTS skills (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS subject_skills (
    subject_id INTEGER NOT NULL,
    skill_id INTEGER NOT NULL,
    PRIMARY KEY (subject_id, skill_id),
    FOREIGN KEY (subject_id) REFERENCES subject_records (id) ON DELETE CASCADE,
    FOREIGN KEY (skill_id) REFERENCES skills (id)
);

CREATE INDEX IF NOT EXISTS idx_subject_skills_skill ON subject_skills (skill_id);
"#;

pub const EDUCATION_LEVELS: [&str; 6] = [
    "Primary",
    "Secondary",
    "High School",
    "Bachelor",
    "Master",
    "Doctorate",
];

/// Creates missing tables and seeds the fixed lookup catalogs. Safe to run on every start.
#[instrument(skip(pool))]
pub async fn initialize_database(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    info!("Applying database schema");
    sqlx::raw_sql(CURRENT_SCHEMA).execute(pool).await?;

    for role in [Role::Administrator, Role::Standard] {
        sqlx::query("INSERT OR IGNORE INTO roles (name) VALUES (?)")
            .bind(role.as_str())
            .execute(pool)
            .await?;
    }

    for permission in Permission::ALL {
        sqlx::query("INSERT OR IGNORE INTO permissions (name, description) VALUES (?, ?)")
            .bind(permission.as_str())
            .bind(permission.description())
            .execute(pool)
            .await?;
    }

    for level in EDUCATION_LEVELS {
        sqlx::query("INSERT OR IGNORE INTO education_levels (name) VALUES (?)")
            .bind(level)
            .execute(pool)
            .await?;
    }

    info!("Database schema ready");
    Ok(())
}
