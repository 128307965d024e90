// src/handlers/exam.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use validator::Validate;

use crate::{error::AppError, models::request::ExamPath, session::ExamSession};

/// Fetches the exam gating a sequence and returns the screen to render.
///
/// LMS failures are recorded on the session's error banner and reported
/// with the view that was on display before the call.
pub async fn fetch_exam(
    State(session): State<Arc<ExamSession>>,
    Path(params): Path<ExamPath>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = params.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    if let Err(e) = session
        .fetch_exam_attempts(&params.course_id, &params.sequence_id)
        .await
    {
        tracing::warn!("Serving previous exam view after fetch failure: {}", e.message());
    }

    Ok(Json(session.view().await))
}

/// Returns the current view without contacting the LMS.
pub async fn get_view(State(session): State<Arc<ExamSession>>) -> impl IntoResponse {
    Json(session.view().await)
}
