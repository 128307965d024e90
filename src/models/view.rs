// src/models/view.rs

use serde::Serialize;

use crate::{
    models::{attempt::Attempt, exam::Exam},
    router::UiState,
    timer::TimerSnapshot,
    utils::html::clean_html,
};

/// Dismissible error banner shown above the exam screens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiErrorBanner {
    pub message: String,
    pub details: Option<String>,
    pub show_details: bool,
}

impl ApiErrorBanner {
    /// Builds a banner; server-provided text is sanitized before display.
    pub fn new(message: &str, details: Option<&str>) -> Self {
        Self {
            message: clean_html(message),
            details: details.map(clean_html),
            show_details: false,
        }
    }
}

/// Everything the UI shell needs to draw the current exam.
#[derive(Debug, Clone, Serialize)]
pub struct ExamView {
    pub ui_state: Option<UiState>,
    pub exam: Option<Exam>,
    pub active_attempt: Option<Attempt>,
    pub timer: Option<TimerSnapshot>,
    pub skip_proctoring: bool,
    pub time_is_over: bool,
    pub api_error: Option<ApiErrorBanner>,
}
