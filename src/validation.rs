use crate::error::{AppError, AppResult};
use crate::models::BookFields;

/// Validate the fields of a create or update request.
///
/// Rules:
/// - `title` must contain at least one non-whitespace character
/// - `author` must contain at least one non-whitespace character
///
/// Everything else (year, ISBN format) is accepted as given.
pub fn validate_book_fields(fields: &BookFields) -> AppResult<()> {
    if fields.title.trim().is_empty() || fields.author.trim().is_empty() {
        return Err(AppError::BadRequest("invalid data".to_string()));
    }
    Ok(())
}
