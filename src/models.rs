use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const NATIONAL_ID_LENGTH: usize = 18;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EducationLevel {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PermissionInfo {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// A registered subject as returned to clients, with skills and photo URL resolved.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubjectRecord {
    pub id: i64,
    pub national_id: String,
    pub name: String,
    pub surname: String,
    pub address: String,
    pub birthdate: NaiveDate,
    pub education_level: String,
    pub skills: Vec<String>,
    pub photo_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSubjectRecord {
    pub id: i64,
    pub national_id: String,
    pub name: String,
    pub surname: String,
    pub address: String,
    pub birthdate: NaiveDate,
    pub education_level: String,
    pub photo: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Raw create/update payload. Missing text fields deserialize as empty and fail validation.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SubjectInput {
    #[serde(default)]
    pub national_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub address: String,
    pub birthdate: Option<NaiveDate>,
    pub education_level: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub photo_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A payload that passed validation: every text field trimmed, skills cleaned.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidSubject {
    pub national_id: String,
    pub name: String,
    pub surname: String,
    pub address: String,
    pub birthdate: NaiveDate,
    pub education_level: String,
    pub skills: Vec<String>,
    pub photo: Option<String>,
    pub coordinates: Option<(f64, f64)>,
}

fn required(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

impl SubjectInput {
    /// Checks the payload without touching storage. Reports the first violated field.
    pub fn validate(&self) -> Result<ValidSubject, AppError> {
        let national_id = required(&self.national_id, "national_id")?;
        if national_id.chars().count() != NATIONAL_ID_LENGTH {
            return Err(AppError::Validation(format!(
                "national_id must be exactly {} characters",
                NATIONAL_ID_LENGTH
            )));
        }

        let name = required(&self.name, "name")?;
        let surname = required(&self.surname, "surname")?;
        let address = required(&self.address, "address")?;

        let birthdate = self
            .birthdate
            .ok_or_else(|| AppError::Validation("birthdate is required".to_string()))?;

        let education_level = required(
            self.education_level.as_deref().unwrap_or_default(),
            "education_level",
        )?;

        let coordinates = match (self.latitude, self.longitude) {
            (None, None) => None,
            (Some(lat), Some(lng)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(AppError::Validation(
                        "latitude must be between -90 and 90".to_string(),
                    ));
                }
                if !(-180.0..=180.0).contains(&lng) {
                    return Err(AppError::Validation(
                        "longitude must be between -180 and 180".to_string(),
                    ));
                }
                Some((lat, lng))
            }
            _ => {
                return Err(AppError::Validation(
                    "latitude and longitude must be supplied together".to_string(),
                ));
            }
        };

        Ok(ValidSubject {
            national_id,
            name,
            surname,
            address,
            birthdate,
            education_level,
            skills: clean_skills(&self.skills),
            photo: self.photo_url.as_deref().and_then(photo_reference),
            coordinates,
        })
    }
}

/// Trims skill names, drops blanks and repeats, keeps first-seen order.
pub fn clean_skills(skills: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(skills.len());
    for skill in skills {
        let skill = skill.trim();
        if !skill.is_empty() && !cleaned.iter().any(|s| s == skill) {
            cleaned.push(skill.to_string());
        }
    }
    cleaned
}

/// Keeps only the trailing path segment of a photo URL.
pub fn photo_reference(url: &str) -> Option<String> {
    let segment = url.trim().rsplit('/').next().unwrap_or_default();
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}
