use std::sync::Arc;

use crate::config::Config;
use crate::session::ExamSession;
use axum::extract::FromRef;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<ExamSession>,
    pub config: Config,
}

impl FromRef<AppState> for Arc<ExamSession> {
    fn from_ref(state: &AppState) -> Self {
        state.session.clone()
    }
}
