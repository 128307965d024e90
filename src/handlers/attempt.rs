// src/handlers/attempt.rs

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::{
    error::AppError,
    models::request::{ActionRequest, GateAction},
    session::ExamSession,
};

/// Performs a learner action on the current exam and returns the new view.
///
/// Missing exam or attempt data is a 409 and LMS failures a 502; either
/// way the session keeps its previous state and shows the error banner.
pub async fn perform_action(
    State(session): State<Arc<ExamSession>>,
    Json(req): Json<ActionRequest>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(action = ?req.action, "exam action requested");

    match req.action {
        GateAction::StartTimed => session.start_timed_exam().await?,
        GateAction::CreateProctored => session.create_proctored_attempt().await?,
        GateAction::StartProctored => session.start_proctored_exam().await?,
        GateAction::SkipProctoring => session.skip_proctoring(true).await,
        GateAction::CancelSkipProctoring => session.skip_proctoring(false).await,
        GateAction::SkipProctoredExam => session.skip_proctored_exam().await?,
        GateAction::ClickDownloadSoftware => session.click_download_software().await?,
        GateAction::Continue => session.continue_exam().await?,
        GateAction::Stop => session.stop_exam().await?,
        GateAction::Submit => session.submit_exam().await?,
        GateAction::Reset => session.reset_exam().await?,
        GateAction::Decline => session.decline_exam().await?,
    }

    Ok(Json(session.view().await))
}

/// Hides the error banner.
pub async fn dismiss_error(State(session): State<Arc<ExamSession>>) -> impl IntoResponse {
    session.dismiss_error().await;
    Json(session.view().await)
}

/// Toggles the "show details" part of the error banner.
pub async fn toggle_error_details(State(session): State<Arc<ExamSession>>) -> impl IntoResponse {
    session.toggle_error_details().await;
    Json(session.view().await)
}
