// src/models/request.rs

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use validator::Validate;

static COURSE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^course-v1:[^/+\s]+\+[^/+\s]+\+[^/+\s]+$").unwrap());

static USAGE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^block-v1:[^/+\s]+\+[^/+\s]+\+[^/+\s]+\+type@[\w-]+\+block@[\w.-]+$").unwrap()
});

/// Path parameters identifying the gated sequence.
#[derive(Debug, Deserialize, Validate)]
pub struct ExamPath {
    #[validate(length(max = 255), custom(function = validate_course_key))]
    pub course_id: String,
    #[validate(length(max = 255), custom(function = validate_usage_key))]
    pub sequence_id: String,
}

/// Learner actions the UI shell can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    StartTimed,
    CreateProctored,
    StartProctored,
    SkipProctoring,
    CancelSkipProctoring,
    SkipProctoredExam,
    ClickDownloadSoftware,
    Continue,
    Stop,
    Submit,
    Reset,
    Decline,
}

/// DTO for triggering an action on the current exam.
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: GateAction,
}

/// Accepts `course-v1:{org}+{course}+{run}` keys.
fn validate_course_key(key: &str) -> Result<(), validator::ValidationError> {
    if !COURSE_KEY.is_match(key) {
        return Err(validator::ValidationError::new("invalid_course_id"));
    }
    Ok(())
}

/// Accepts `block-v1:{org}+{course}+{run}+type@{type}+block@{id}` keys.
fn validate_usage_key(key: &str) -> Result<(), validator::ValidationError> {
    if !USAGE_KEY.is_match(key) {
        return Err(validator::ValidationError::new("invalid_sequence_id"));
    }
    Ok(())
}
