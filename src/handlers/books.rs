//! Book resource handlers, the terminal handlers of the pipeline.
//!
//! Rejections from axum extractors are taken as `Result`s and mapped onto
//! [`AppError`], so a bad id is a 404 and a bad body a 400 (or 413 when the
//! body cap was hit) with the usual JSON error body.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};
use crate::models::{Book, CreateBookRequest, CreatedResponse, UpdateBookRequest};
use crate::state::AppState;
use crate::tracer::SpanContext;
use crate::validation::validate_book_fields;

/// List all books ordered by id.
#[instrument(skip_all)]
pub async fn list_books(State(state): State<AppState>) -> Json<Vec<Book>> {
    Json(state.repository.list())
}

/// Create a book.
///
/// Returns 201 with `{"id": <new id>}`.
#[instrument(skip_all)]
pub async fn create_book(
    State(state): State<AppState>,
    span: Option<Extension<SpanContext>>,
    payload: Result<Json<CreateBookRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<CreatedResponse>)> {
    let Json(payload) = payload?;
    validate_book_fields(&payload)?;

    let id = state.repository.create(payload);
    if let Some(Extension(span)) = span {
        debug!(book_id = id, span_id = %span.id(), "Book created");
    } else {
        debug!(book_id = id, "Book created");
    }

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// Get a book by id.
#[instrument(skip_all)]
pub async fn get_book(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> AppResult<Json<Book>> {
    let Path(id) = id?;

    state
        .repository
        .get(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("not found".to_string()))
}

/// Replace every field of a book. Returns 204.
///
/// An unknown id is a 404 rather than a silent no-op 204, and never creates
/// the book.
#[instrument(skip_all)]
pub async fn update_book(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
    payload: Result<Json<UpdateBookRequest>, JsonRejection>,
) -> AppResult<StatusCode> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    validate_book_fields(&payload)?;

    if state.repository.update(id, payload) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("not found".to_string()))
    }
}

/// Delete a book. Returns 204 whether or not it existed.
#[instrument(skip_all)]
pub async fn delete_book(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> AppResult<StatusCode> {
    let Path(id) = id?;
    state.repository.delete(id);
    Ok(StatusCode::NO_CONTENT)
}
