use rocket::serde::json::Json;
use validator::{Validate, ValidationErrors};

use crate::error::AppError;

/// Flattens validator output into a single message naming the first failing field.
pub fn first_violation(errors: &ValidationErrors) -> String {
    let field_errors = errors.field_errors();
    let mut fields: Vec<_> = field_errors.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    fields
        .into_iter()
        .find_map(|(field, errs)| {
            errs.first().map(|err| {
                let message = err
                    .message
                    .clone()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "is invalid".to_string());
                format!("{} {}", field, message)
            })
        })
        .unwrap_or_else(|| "Invalid request".to_string())
}

pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, AppError> {
        let inner = self.into_inner();
        inner
            .validate()
            .map_err(|errors| AppError::Validation(first_violation(&errors)))?;
        Ok(inner)
    }
}
