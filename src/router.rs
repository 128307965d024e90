// src/router.rs

//! Maps an exam and its attempt to the screen the learner must see.
//!
//! The decision is an ordered table of named rules; the first rule whose
//! predicate holds produces the state. Anything no rule claims ends up as
//! [`UiState::UnknownStatus`].

use serde::Serialize;

use crate::models::{
    attempt::{Attempt, AttemptStatus},
    exam::{Exam, ExamType},
};

/// Screen the UI shell renders for the current exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum UiState {
    SkipProctoringConfirmation,
    Expired,
    Entrance { exam_type: ExamType },
    PrerequisitesEntrance,
    Download { allow_skip: bool },
    ReadyToStart,
    SubmitConfirmation { can_continue: bool },
    Submitted { exam_type: ExamType },
    Verified { exam_type: ExamType },
    Rejected { exam_type: ExamType },
    Error { exam_type: ExamType },
    OnboardingError { status: AttemptStatus },
    ExamContent,
    UnknownStatus { status: String },
}

/// Facts the router decides on.
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub exam: &'a Exam,
    pub attempt: Option<&'a Attempt>,
    pub skip_proctoring_requested: bool,
    pub prerequisites_passed: bool,

    /// Set once the countdown reached 00:00.
    pub time_is_over: bool,
}

impl<'a> RouteInput<'a> {
    /// Builds the input from the exam's own attempt and prerequisite facts.
    pub fn from_exam(exam: &'a Exam) -> Self {
        Self {
            exam,
            attempt: exam.attempt.as_ref(),
            skip_proctoring_requested: false,
            prerequisites_passed: exam.prerequisite_status.are_prerequisites_satisfied,
            time_is_over: false,
        }
    }

    pub fn skip_proctoring(mut self, requested: bool) -> Self {
        self.skip_proctoring_requested = requested;
        self
    }

    pub fn time_is_over(mut self, over: bool) -> Self {
        self.time_is_over = over;
        self
    }

    fn exam_type(&self) -> ExamType {
        self.exam.exam_type
    }

    /// Attempt with an id, if any.
    fn live_attempt(&self) -> Option<&'a Attempt> {
        self.attempt.filter(|a| a.has_id())
    }

    fn status(&self) -> Option<&'a AttemptStatus> {
        self.live_attempt().map(|a| &a.attempt_status)
    }

    fn status_is(&self, status: AttemptStatus) -> bool {
        self.status() == Some(&status)
    }
}

/// One entry of the routing table.
pub struct Rule {
    pub name: &'static str,
    applies: fn(&RouteInput<'_>) -> bool,
    state: fn(&RouteInput<'_>) -> UiState,
}

/// Routing table, highest priority first.
pub static RULES: &[Rule] = &[
    Rule {
        name: "skip_proctoring",
        applies: |i| i.exam_type() == ExamType::Proctored && i.skip_proctoring_requested,
        state: |_| UiState::SkipProctoringConfirmation,
    },
    Rule {
        name: "expired",
        applies: |i| {
            i.exam.passed_due_date
                && i.exam_type() != ExamType::Practice
                && i.status().is_none_or(AttemptStatus::is_incomplete)
        },
        state: |_| UiState::Expired,
    },
    Rule {
        name: "no_attempt",
        applies: |i| i.live_attempt().is_none(),
        state: |i| {
            if i.exam_type() == ExamType::Proctored && !i.prerequisites_passed {
                UiState::PrerequisitesEntrance
            } else {
                UiState::Entrance {
                    exam_type: i.exam_type(),
                }
            }
        },
    },
    Rule {
        name: "ready_to_resume",
        applies: |i| {
            i.live_attempt().is_some_and(|a| a.attempt_ready_to_resume)
                || i.status_is(AttemptStatus::ReadyToResume)
        },
        state: |i| UiState::Entrance {
            exam_type: i.exam_type(),
        },
    },
    Rule {
        name: "created",
        applies: |i| i.status_is(AttemptStatus::Created),
        state: |i| UiState::Download {
            allow_skip: i.exam.allow_proctoring_opt_out,
        },
    },
    Rule {
        name: "download_software_clicked",
        applies: |i| i.status_is(AttemptStatus::DownloadSoftwareClicked),
        state: |_| UiState::Download { allow_skip: false },
    },
    Rule {
        name: "ready_to_start",
        applies: |i| i.status_is(AttemptStatus::ReadyToStart),
        state: |_| UiState::ReadyToStart,
    },
    Rule {
        name: "ready_to_submit",
        applies: |i| i.status_is(AttemptStatus::ReadyToSubmit),
        state: |i| UiState::SubmitConfirmation {
            can_continue: !i.time_is_over
                && i.live_attempt().is_some_and(|a| a.time_remaining_seconds > 0),
        },
    },
    Rule {
        name: "submitted",
        applies: |i| i.status_is(AttemptStatus::Submitted),
        state: |i| {
            if i.exam_type() == ExamType::Timed && i.exam.passed_due_date {
                // Timed exams stay reviewable after the due date unless hidden.
                if i.exam.hide_after_due {
                    UiState::Expired
                } else {
                    UiState::ExamContent
                }
            } else {
                UiState::Submitted {
                    exam_type: i.exam_type(),
                }
            }
        },
    },
    Rule {
        name: "second_review_required",
        applies: |i| i.status_is(AttemptStatus::SecondReviewRequired),
        state: |i| UiState::Submitted {
            exam_type: i.exam_type(),
        },
    },
    Rule {
        name: "verified",
        applies: |i| i.status_is(AttemptStatus::Verified),
        state: |i| UiState::Verified {
            exam_type: i.exam_type(),
        },
    },
    Rule {
        name: "rejected",
        applies: |i| i.status_is(AttemptStatus::Rejected),
        state: |i| UiState::Rejected {
            exam_type: i.exam_type(),
        },
    },
    Rule {
        name: "error",
        applies: |i| i.status_is(AttemptStatus::Error),
        state: |i| UiState::Error {
            exam_type: i.exam_type(),
        },
    },
    Rule {
        name: "onboarding_error",
        applies: |i| {
            i.exam_type() == ExamType::Proctored
                && i.status().is_some_and(AttemptStatus::is_onboarding_error)
        },
        state: |i| UiState::OnboardingError {
            status: i.status().cloned().unwrap_or(AttemptStatus::Error),
        },
    },
    Rule {
        name: "started",
        applies: |i| i.status_is(AttemptStatus::Started) || i.status_is(AttemptStatus::TimedOut),
        state: |_| UiState::ExamContent,
    },
];

/// Name of the rule that decides `input`, or `None` for the fallback.
pub fn matched_rule(input: &RouteInput<'_>) -> Option<&'static str> {
    RULES.iter().find(|r| (r.applies)(input)).map(|r| r.name)
}

/// Picks the screen for `input`. Never panics.
pub fn route(input: &RouteInput<'_>) -> UiState {
    RULES
        .iter()
        .find(|r| (r.applies)(input))
        .map(|r| (r.state)(input))
        .unwrap_or_else(|| {
            let status = input
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default();
            tracing::warn!(%status, "no screen for attempt status");
            UiState::UnknownStatus { status }
        })
}
