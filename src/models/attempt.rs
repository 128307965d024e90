// src/models/attempt.rs

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::exam::ExamType;

/// Attempt status as reported by the LMS.
///
/// Values the client does not know are kept verbatim in `Unknown` so the
/// router can surface them instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttemptStatus {
    Eligible,
    Created,
    DownloadSoftwareClicked,
    ReadyToStart,
    Started,
    ReadyToSubmit,
    Submitted,
    SecondReviewRequired,
    TimedOut,
    Verified,
    Rejected,
    Error,
    ReadyToResume,
    OnboardingMissing,
    OnboardingPending,
    OnboardingFailed,
    OnboardingExpired,
    Declined,
    Unknown(String),
}

impl AttemptStatus {
    /// Every status the LMS is known to send.
    pub const KNOWN: [AttemptStatus; 18] = [
        AttemptStatus::Eligible,
        AttemptStatus::Created,
        AttemptStatus::DownloadSoftwareClicked,
        AttemptStatus::ReadyToStart,
        AttemptStatus::Started,
        AttemptStatus::ReadyToSubmit,
        AttemptStatus::Submitted,
        AttemptStatus::SecondReviewRequired,
        AttemptStatus::TimedOut,
        AttemptStatus::Verified,
        AttemptStatus::Rejected,
        AttemptStatus::Error,
        AttemptStatus::ReadyToResume,
        AttemptStatus::OnboardingMissing,
        AttemptStatus::OnboardingPending,
        AttemptStatus::OnboardingFailed,
        AttemptStatus::OnboardingExpired,
        AttemptStatus::Declined,
    ];

    pub fn parse(raw: &str) -> Self {
        match raw {
            "eligible" => Self::Eligible,
            "created" => Self::Created,
            "download_software_clicked" => Self::DownloadSoftwareClicked,
            "ready_to_start" => Self::ReadyToStart,
            "started" => Self::Started,
            "ready_to_submit" => Self::ReadyToSubmit,
            "submitted" => Self::Submitted,
            "second_review_required" => Self::SecondReviewRequired,
            "timed_out" => Self::TimedOut,
            "verified" => Self::Verified,
            "rejected" => Self::Rejected,
            "error" => Self::Error,
            "ready_to_resume" => Self::ReadyToResume,
            "onboarding_missing" => Self::OnboardingMissing,
            "onboarding_pending" => Self::OnboardingPending,
            "onboarding_failed" => Self::OnboardingFailed,
            "onboarding_expired" => Self::OnboardingExpired,
            "declined" => Self::Declined,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Eligible => "eligible",
            Self::Created => "created",
            Self::DownloadSoftwareClicked => "download_software_clicked",
            Self::ReadyToStart => "ready_to_start",
            Self::Started => "started",
            Self::ReadyToSubmit => "ready_to_submit",
            Self::Submitted => "submitted",
            Self::SecondReviewRequired => "second_review_required",
            Self::TimedOut => "timed_out",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
            Self::Error => "error",
            Self::ReadyToResume => "ready_to_resume",
            Self::OnboardingMissing => "onboarding_missing",
            Self::OnboardingPending => "onboarding_pending",
            Self::OnboardingFailed => "onboarding_failed",
            Self::OnboardingExpired => "onboarding_expired",
            Self::Declined => "declined",
            Self::Unknown(raw) => raw,
        }
    }

    /// Statuses of an attempt that has not been handed in yet.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::Eligible
                | Self::Created
                | Self::DownloadSoftwareClicked
                | Self::ReadyToStart
                | Self::Started
                | Self::ReadyToSubmit
        )
    }

    pub fn is_onboarding_error(&self) -> bool {
        matches!(
            self,
            Self::OnboardingMissing
                | Self::OnboardingPending
                | Self::OnboardingFailed
                | Self::OnboardingExpired
        )
    }

    /// Statuses during which the countdown is shown.
    pub fn is_timed(&self) -> bool {
        matches!(self, Self::Started | Self::ReadyToSubmit)
    }
}

impl From<String> for AttemptStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<AttemptStatus> for String {
    fn from(status: AttemptStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A learner's attempt at an exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    #[serde(default)]
    pub attempt_id: Option<i64>,
    pub attempt_status: AttemptStatus,
    #[serde(default)]
    pub exam_type: Option<ExamType>,
    #[serde(default)]
    pub taking_as_proctored: bool,
    #[serde(default)]
    pub time_remaining_seconds: i64,

    /// Time limit of the exam this attempt belongs to.
    #[serde(default)]
    pub time_limit_mins: Option<i64>,
    #[serde(default)]
    pub exam_started_poll_url: Option<String>,

    /// Proctoring vendor session id.
    #[serde(default)]
    pub external_id: Option<String>,

    /// Heartbeat endpoint of the desktop proctoring worker.
    #[serde(default)]
    pub desktop_application_js_url: Option<String>,

    /// Heartbeat period in seconds.
    #[serde(default)]
    pub ping_interval: Option<u64>,

    #[serde(default)]
    pub attempt_ready_to_resume: bool,

    /// Absolute end of the countdown, stamped when the attempt was synced.
    #[serde(default)]
    pub timer_deadline: Option<DateTime<Utc>>,
}

impl Attempt {
    /// An attempt with no id is treated like no attempt at all.
    pub fn has_id(&self) -> bool {
        self.attempt_id.is_some()
    }

    /// Recomputes the deadline from the server-reported remaining time.
    pub fn stamp_deadline(&mut self, synced_at: DateTime<Utc>) {
        self.timer_deadline = Some(synced_at + Duration::seconds(self.time_remaining_seconds));
    }

    /// Folds a poll result into this attempt.
    pub fn apply_poll(&mut self, poll: &PollResponse, synced_at: DateTime<Utc>) {
        self.attempt_status = poll.status.clone();
        if let Some(remaining) = poll.time_remaining_seconds {
            self.time_remaining_seconds = remaining;
            self.stamp_deadline(synced_at);
        }
    }
}

/// Status-changing actions accepted by the attempt endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptAction {
    Start,
    Stop,
    Ping,
    Submit,
    Error,
    ResetAttempt,
    ClickDownloadSoftware,
    Decline,
}

impl AttemptAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Ping => "ping",
            Self::Submit => "submit",
            Self::Error => "error",
            Self::ResetAttempt => "reset_attempt",
            Self::ClickDownloadSoftware => "click_download_software",
            Self::Decline => "decline",
        }
    }
}

/// Body sent to the LMS when transitioning an attempt.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub action: AttemptAction,
}

/// Body sent to the LMS when creating an attempt.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAttemptRequest {
    pub exam_id: i64,
    pub start_clock: bool,
    pub attempt_proctored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAttemptResponse {
    pub exam_attempt_id: i64,
}

/// Poll endpoint result, normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResponse {
    pub status: AttemptStatus,
    pub time_remaining_seconds: Option<i64>,
}

/// Wire shape of the poll endpoint; older LMS versions send `attempt_status`.
#[derive(Debug, Deserialize)]
struct RawPollResponse {
    status: Option<AttemptStatus>,
    attempt_status: Option<AttemptStatus>,
    time_remaining_seconds: Option<i64>,
}

impl<'de> Deserialize<'de> for PollResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawPollResponse::deserialize(deserializer)?;
        let status = raw
            .status
            .or(raw.attempt_status)
            .ok_or_else(|| serde::de::Error::missing_field("status"))?;
        Ok(PollResponse {
            status,
            time_remaining_seconds: raw.time_remaining_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        for status in AttemptStatus::KNOWN {
            let wire = serde_json::to_value(&status).unwrap();
            assert_eq!(wire, json!(status.as_str()));
            assert_eq!(AttemptStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_unknown_status_is_preserved() {
        let status: AttemptStatus = serde_json::from_value(json!("paused")).unwrap();
        assert_eq!(status, AttemptStatus::Unknown("paused".to_string()));
        assert_eq!(status.to_string(), "paused");
    }

    #[test]
    fn test_legacy_poll_is_normalized() {
        let poll: PollResponse =
            serde_json::from_value(json!({ "attempt_status": "submitted" })).unwrap();
        assert_eq!(poll.status, AttemptStatus::Submitted);
        assert_eq!(poll.time_remaining_seconds, None);

        let poll: PollResponse = serde_json::from_value(
            json!({ "status": "started", "time_remaining_seconds": 42 }),
        )
        .unwrap();
        assert_eq!(poll.status, AttemptStatus::Started);
        assert_eq!(poll.time_remaining_seconds, Some(42));

        assert!(serde_json::from_value::<PollResponse>(json!({})).is_err());
    }

    #[test]
    fn test_apply_poll_restamps_deadline() {
        let synced = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut attempt: Attempt = serde_json::from_value(json!({
            "attempt_id": 7,
            "attempt_status": "started",
            "time_remaining_seconds": 600
        }))
        .unwrap();
        attempt.stamp_deadline(synced);
        assert_eq!(attempt.timer_deadline, Some(synced + Duration::seconds(600)));

        let later = synced + Duration::seconds(60);
        attempt.apply_poll(
            &PollResponse {
                status: AttemptStatus::ReadyToSubmit,
                time_remaining_seconds: Some(500),
            },
            later,
        );
        assert_eq!(attempt.attempt_status, AttemptStatus::ReadyToSubmit);
        assert_eq!(attempt.timer_deadline, Some(later + Duration::seconds(500)));
    }

    #[test]
    fn test_action_wire_names() {
        let body = serde_json::to_value(TransitionRequest {
            action: AttemptAction::ClickDownloadSoftware,
        })
        .unwrap();
        assert_eq!(body, json!({ "action": "click_download_software" }));
        assert_eq!(AttemptAction::ResetAttempt.as_str(), "reset_attempt");
    }
}
