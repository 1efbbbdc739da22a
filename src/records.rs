use std::collections::HashMap;
use std::fmt;

use sqlx::{Pool, Sqlite, SqliteConnection, Transaction};
use tracing::{error, info, instrument, warn};

use crate::error::{AppError, is_unique_violation};
use crate::models::{DbSubjectRecord, SubjectInput, SubjectRecord, ValidSubject};
use crate::photos::PhotoStore;

/// Step of a record write that was running when it finished or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Begin,
    Lookup,
    ResolveForeignKeys,
    DuplicateCheck,
    WritePrimary,
    ReconcileSkills,
    Commit,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Begin => "begin",
            WriteStage::Lookup => "lookup",
            WriteStage::ResolveForeignKeys => "resolve_foreign_keys",
            WriteStage::DuplicateCheck => "duplicate_check",
            WriteStage::WritePrimary => "write_primary",
            WriteStage::ReconcileSkills => "reconcile_skills",
            WriteStage::Commit => "commit",
        };
        f.write_str(name)
    }
}

const DUPLICATE_NATIONAL_ID: &str = "A subject record with this national_id already exists";

const RECORD_SELECT: &str = "SELECT s.id, s.national_id, s.name, s.surname, s.address, s.birthdate,
            e.name AS education_level, s.photo, s.latitude, s.longitude
     FROM subject_records s
     JOIN education_levels e ON e.id = s.education_level_id";

/// Commits on success, rolls back on failure. Either way the transaction is consumed here.
async fn finish<T>(
    tx: Transaction<'_, Sqlite>,
    outcome: Result<T, AppError>,
    stage: WriteStage,
    operation: &'static str,
) -> Result<T, AppError> {
    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(|err| {
                error!(operation, stage = %WriteStage::Commit, error = %err, "Commit failed");
                AppError::Database(err)
            })?;
            Ok(value)
        }
        Err(err) => {
            warn!(operation, stage = %stage, error = %err, "Rolling back record transaction");
            if let Err(rollback_err) = tx.rollback().await {
                error!(operation, error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

async fn resolve_education_level(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<i64, AppError> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM education_levels WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    match id {
        Some(id) => Ok(id),
        None => {
            let valid = sqlx::query_scalar::<_, String>(
                "SELECT name FROM education_levels ORDER BY name",
            )
            .fetch_all(&mut *conn)
            .await?;

            Err(AppError::InvalidReference {
                field: "education_level",
                value: name.to_string(),
                valid,
            })
        }
    }
}

async fn ensure_unique_national_id(
    conn: &mut SqliteConnection,
    national_id: &str,
    excluding: Option<i64>,
) -> Result<(), AppError> {
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM subject_records WHERE national_id = ? AND id IS NOT ?",
    )
    .bind(national_id)
    .bind(excluding)
    .fetch_optional(&mut *conn)
    .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(DUPLICATE_NATIONAL_ID.to_string()));
    }
    Ok(())
}

/// The pre-check above is racy; the UNIQUE constraint is what actually decides.
pub(crate) fn map_write_error(err: sqlx::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict(DUPLICATE_NATIONAL_ID.to_string())
    } else {
        AppError::Database(err)
    }
}

async fn link_skills(
    conn: &mut SqliteConnection,
    subject_id: i64,
    skills: &[String],
) -> Result<(), AppError> {
    for skill in skills {
        sqlx::query("INSERT INTO skills (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
            .bind(skill)
            .execute(&mut *conn)
            .await?;

        let skill_id = sqlx::query_scalar::<_, i64>("SELECT id FROM skills WHERE name = ?")
            .bind(skill)
            .fetch_one(&mut *conn)
            .await?;

        sqlx::query(
            "INSERT INTO subject_skills (subject_id, skill_id) VALUES (?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(subject_id)
        .bind(skill_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn unlink_skills(conn: &mut SqliteConnection, subject_id: i64) -> Result<(), AppError> {
    sqlx::query("DELETE FROM subject_skills WHERE subject_id = ?")
        .bind(subject_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Returns the stored photo reference, or NotFound when the record does not exist.
async fn lookup_photo(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<String>, AppError> {
    let row = sqlx::query_scalar::<_, Option<String>>(
        "SELECT photo FROM subject_records WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.ok_or_else(|| AppError::NotFound(format!("Subject record with id {} not found", id)))
}

/// Hands back `photo` for removal only when no record points at it any more.
async fn release_photo(
    conn: &mut SqliteConnection,
    photo: Option<String>,
) -> Result<Option<String>, AppError> {
    let Some(photo) = photo else {
        return Ok(None);
    };

    let remaining = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM subject_records WHERE photo = ?",
    )
    .bind(&photo)
    .fetch_one(&mut *conn)
    .await?;

    if remaining > 0 {
        info!(remaining, "Photo still referenced, keeping it");
        return Ok(None);
    }
    Ok(Some(photo))
}

async fn insert_steps(
    conn: &mut SqliteConnection,
    subject: &ValidSubject,
    stage: &mut WriteStage,
) -> Result<i64, AppError> {
    *stage = WriteStage::ResolveForeignKeys;
    let education_level_id = resolve_education_level(conn, &subject.education_level).await?;

    *stage = WriteStage::DuplicateCheck;
    ensure_unique_national_id(conn, &subject.national_id, None).await?;

    *stage = WriteStage::WritePrimary;
    let (latitude, longitude) = subject.coordinates.unzip();
    let res = sqlx::query(
        "INSERT INTO subject_records
         (national_id, name, surname, address, birthdate, education_level_id, photo, latitude, longitude)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&subject.national_id)
    .bind(&subject.name)
    .bind(&subject.surname)
    .bind(&subject.address)
    .bind(subject.birthdate)
    .bind(education_level_id)
    .bind(&subject.photo)
    .bind(latitude)
    .bind(longitude)
    .execute(&mut *conn)
    .await
    .map_err(map_write_error)?;
    let id = res.last_insert_rowid();

    *stage = WriteStage::ReconcileSkills;
    link_skills(conn, id, &subject.skills).await?;

    Ok(id)
}

async fn update_steps(
    conn: &mut SqliteConnection,
    id: i64,
    subject: &ValidSubject,
    stage: &mut WriteStage,
) -> Result<Option<String>, AppError> {
    *stage = WriteStage::Lookup;
    let previous_photo = lookup_photo(conn, id).await?;

    *stage = WriteStage::ResolveForeignKeys;
    let education_level_id = resolve_education_level(conn, &subject.education_level).await?;

    *stage = WriteStage::DuplicateCheck;
    ensure_unique_national_id(conn, &subject.national_id, Some(id)).await?;

    *stage = WriteStage::WritePrimary;
    let (latitude, longitude) = subject.coordinates.unzip();
    sqlx::query(
        "UPDATE subject_records
         SET national_id = ?, name = ?, surname = ?, address = ?, birthdate = ?,
             education_level_id = ?, photo = ?, latitude = ?, longitude = ?
         WHERE id = ?",
    )
    .bind(&subject.national_id)
    .bind(&subject.name)
    .bind(&subject.surname)
    .bind(&subject.address)
    .bind(subject.birthdate)
    .bind(education_level_id)
    .bind(&subject.photo)
    .bind(latitude)
    .bind(longitude)
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(map_write_error)?;

    *stage = WriteStage::ReconcileSkills;
    unlink_skills(conn, id).await?;
    link_skills(conn, id, &subject.skills).await?;

    release_photo(conn, previous_photo).await
}

async fn delete_steps(
    conn: &mut SqliteConnection,
    id: i64,
    stage: &mut WriteStage,
) -> Result<Option<String>, AppError> {
    *stage = WriteStage::Lookup;
    let photo = lookup_photo(conn, id).await?;

    *stage = WriteStage::ReconcileSkills;
    unlink_skills(conn, id).await?;

    *stage = WriteStage::WritePrimary;
    sqlx::query("DELETE FROM subject_records WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    release_photo(conn, photo).await
}

/// Registers a subject and its skills atomically. Validation runs before any transaction opens.
#[instrument(skip(pool, input))]
pub async fn create_record(pool: &Pool<Sqlite>, input: &SubjectInput) -> Result<i64, AppError> {
    let subject = input.validate()?;

    let mut stage = WriteStage::Begin;
    let mut tx = pool.begin().await?;
    let outcome = insert_steps(&mut tx, &subject, &mut stage).await;
    let id = finish(tx, outcome, stage, "create").await?;

    info!(record_id = id, skills = subject.skills.len(), "Subject record created");
    Ok(id)
}

/// Rewrites a subject and replaces its whole skill set.
///
/// A photo no record references any more is removed once the transaction has committed.
#[instrument(skip(pool, photos, input))]
pub async fn update_record(
    pool: &Pool<Sqlite>,
    photos: &PhotoStore,
    id: i64,
    input: &SubjectInput,
) -> Result<(), AppError> {
    let subject = input.validate()?;

    let mut stage = WriteStage::Begin;
    let mut tx = pool.begin().await?;
    let outcome = update_steps(&mut tx, id, &subject, &mut stage).await;
    let orphaned_photo = finish(tx, outcome, stage, "update").await?;

    info!(record_id = id, "Subject record updated");

    if let Some(photo) = orphaned_photo {
        photos.remove(&photo).await;
    }
    Ok(())
}

/// Deletes a subject and its skill links. Skill rows themselves are kept.
#[instrument(skip(pool, photos))]
pub async fn delete_record(
    pool: &Pool<Sqlite>,
    photos: &PhotoStore,
    id: i64,
) -> Result<(), AppError> {
    let mut stage = WriteStage::Begin;
    let mut tx = pool.begin().await?;
    let outcome = delete_steps(&mut tx, id, &mut stage).await;
    let photo = finish(tx, outcome, stage, "delete").await?;

    info!(record_id = id, "Subject record deleted");

    if let Some(photo) = photo {
        photos.remove(&photo).await;
    }
    Ok(())
}

async fn skills_by_subject(
    pool: &Pool<Sqlite>,
    subject_id: Option<i64>,
) -> Result<HashMap<i64, Vec<String>>, AppError> {
    let rows = sqlx::query_as::<_, (i64, String)>(
        "SELECT ss.subject_id, k.name
         FROM subject_skills ss
         JOIN skills k ON k.id = ss.skill_id
         WHERE ? IS NULL OR ss.subject_id = ?
         ORDER BY k.name",
    )
    .bind(subject_id)
    .bind(subject_id)
    .fetch_all(pool)
    .await?;

    let mut skills: HashMap<i64, Vec<String>> = HashMap::new();
    for (subject_id, name) in rows {
        skills.entry(subject_id).or_default().push(name);
    }
    Ok(skills)
}

fn to_record(
    row: DbSubjectRecord,
    skills: &mut HashMap<i64, Vec<String>>,
    photos: &PhotoStore,
) -> SubjectRecord {
    SubjectRecord {
        id: row.id,
        skills: skills.remove(&row.id).unwrap_or_default(),
        photo_url: row.photo.as_deref().map(|p| photos.url_for(p)),
        national_id: row.national_id,
        name: row.name,
        surname: row.surname,
        address: row.address,
        birthdate: row.birthdate,
        education_level: row.education_level,
        latitude: row.latitude,
        longitude: row.longitude,
    }
}

#[instrument(skip(pool, photos))]
pub async fn list_records(
    pool: &Pool<Sqlite>,
    photos: &PhotoStore,
) -> Result<Vec<SubjectRecord>, AppError> {
    let rows = sqlx::query_as::<_, DbSubjectRecord>(&format!("{RECORD_SELECT} ORDER BY s.id DESC"))
        .fetch_all(pool)
        .await?;

    let mut skills = skills_by_subject(pool, None).await?;

    Ok(rows
        .into_iter()
        .map(|row| to_record(row, &mut skills, photos))
        .collect())
}

#[instrument(skip(pool, photos))]
pub async fn get_record(
    pool: &Pool<Sqlite>,
    photos: &PhotoStore,
    id: i64,
) -> Result<SubjectRecord, AppError> {
    let row = sqlx::query_as::<_, DbSubjectRecord>(&format!("{RECORD_SELECT} WHERE s.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subject record with id {} not found", id)))?;

    let mut skills = skills_by_subject(pool, Some(id)).await?;
    Ok(to_record(row, &mut skills, photos))
}
