// tests/session_tests.rs

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use exam_gate::{
    client::{AttemptApi, PollTarget},
    error::AppError,
    models::{
        attempt::{AttemptAction, AttemptStatus, PollResponse},
        exam::{ExamAttemptsData, ExamType},
    },
    router::UiState,
    session::{ExamSession, SessionSettings},
    timer::MonotonicClock,
    worker::WorkerChannel,
};
use serde_json::{Value, json};

const COURSE_ID: &str = "course-v1:edX+DemoX+Demo_Course";
const SEQUENCE_ID: &str = "block-v1:edX+DemoX+Demo_Course+type@sequential+block@exam_1";

#[derive(Default)]
struct FakeApiState {
    exam: Value,
    active_attempt: Value,
    fetches: usize,
    transitions: Vec<(i64, AttemptAction)>,
    poll_remaining: Option<i64>,
    fail_polls: bool,
    fail_pings: bool,
}

/// Attempt API backed by two JSON documents.
#[derive(Default)]
struct FakeApi {
    state: Mutex<FakeApiState>,
}

impl FakeApi {
    fn new(exam: Value, active_attempt: Value) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeApiState {
                exam,
                active_attempt,
                ..FakeApiState::default()
            }),
        })
    }

    /// Ends `attempt_id` if it is the active attempt.
    fn finish_attempt(&self, attempt_id: i64, status: &str) {
        let mut state = self.state.lock().unwrap();
        if state.active_attempt["attempt_id"] != json!(attempt_id) {
            return;
        }
        state.exam["attempt"]["attempt_status"] = json!(status);
        state.active_attempt = json!({});
    }

    fn transitions(&self) -> Vec<(i64, AttemptAction)> {
        self.state.lock().unwrap().transitions.clone()
    }
}

#[async_trait]
impl AttemptApi for FakeApi {
    async fn fetch_exam_attempts(
        &self,
        course_id: &str,
        sequence_id: &str,
    ) -> Result<ExamAttemptsData, AppError> {
        assert_eq!(course_id, COURSE_ID);
        assert_eq!(sequence_id, SEQUENCE_ID);
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        Ok(serde_json::from_value(json!({
            "exam": state.exam,
            "active_attempt": state.active_attempt
        }))
        .unwrap())
    }

    async fn create_attempt(
        &self,
        _exam_id: i64,
        _start_clock: bool,
        _attempt_proctored: bool,
    ) -> Result<i64, AppError> {
        Err(AppError::Upstream("not used".to_string()))
    }

    async fn transition_attempt(
        &self,
        attempt_id: i64,
        action: AttemptAction,
    ) -> Result<(), AppError> {
        let fail_pings = {
            let mut state = self.state.lock().unwrap();
            state.transitions.push((attempt_id, action));
            state.fail_pings
        };
        match action {
            AttemptAction::Ping if fail_pings => {
                return Err(AppError::Upstream(
                    "LMS returned 503 Service Unavailable: try again".to_string(),
                ));
            }
            AttemptAction::Error => self.finish_attempt(attempt_id, "error"),
            AttemptAction::Submit => self.finish_attempt(attempt_id, "submitted"),
            _ => {}
        }
        Ok(())
    }

    async fn poll_attempt(
        &self,
        target: Option<PollTarget>,
    ) -> Result<Option<PollResponse>, AppError> {
        assert_eq!(target, Some(PollTarget::Sequence(SEQUENCE_ID.to_string())));
        let state = self.state.lock().unwrap();
        if state.fail_polls {
            return Err(AppError::Upstream(
                "LMS returned 502 Bad Gateway: upstream down".to_string(),
            ));
        }
        let status = state.active_attempt["attempt_status"]
            .as_str()
            .unwrap_or("submitted");
        Ok(Some(PollResponse {
            status: AttemptStatus::parse(status),
            time_remaining_seconds: state.poll_remaining,
        }))
    }
}

/// Proctoring worker that either always or never echoes.
#[derive(Default)]
struct FakeWorker {
    echoes: bool,
    pings: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeWorker {
    fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn echoing() -> Arc<Self> {
        Arc::new(Self {
            echoes: true,
            ..Self::default()
        })
    }
}

#[async_trait]
impl WorkerChannel for FakeWorker {
    async fn ping(
        &self,
        worker_url: &str,
        _timeout: Duration,
        attempt_external_id: Option<&str>,
    ) -> Result<(), AppError> {
        self.pings.lock().unwrap().push((
            worker_url.to_string(),
            attempt_external_id.map(str::to_string),
        ));
        if self.echoes {
            Ok(())
        } else {
            Err(AppError::Heartbeat("worker did not answer in time".to_string()))
        }
    }
}

fn exam_json(exam_type: &str, attempt: &Value) -> Value {
    json!({
        "id": 3,
        "course_id": COURSE_ID,
        "content_id": SEQUENCE_ID,
        "exam_name": "Midterm",
        "type": exam_type,
        "time_limit_mins": 10,
        "prerequisite_status": { "are_prerequisites_satisfied": true },
        "attempt": attempt
    })
}

/// Running proctored attempt that pings its worker every 10 seconds.
fn proctored_attempt() -> Value {
    json!({
        "attempt_id": 42,
        "attempt_status": "started",
        "taking_as_proctored": true,
        "time_remaining_seconds": 600,
        "external_id": "vendor-42",
        "desktop_application_js_url": "http://127.0.0.1:9/worker",
        "ping_interval": 10
    })
}

fn session_with(
    api: Arc<FakeApi>,
    worker: Arc<FakeWorker>,
    settings: SessionSettings,
) -> Arc<ExamSession> {
    let clock = MonotonicClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap());
    ExamSession::new(api, worker, Arc::new(clock), settings)
}

#[tokio::test(start_paused = true)]
async fn heartbeat_failure_errors_the_pinned_attempt() {
    let attempt = proctored_attempt();
    let api = FakeApi::new(exam_json("proctored", &attempt), attempt);
    let worker = FakeWorker::silent();
    let session = session_with(api.clone(), worker.clone(), SessionSettings::default());

    session
        .fetch_exam_attempts(COURSE_ID, SEQUENCE_ID)
        .await
        .unwrap();
    assert_eq!(session.view().await.ui_state, Some(UiState::ExamContent));

    // First ping is due halfway through the interval.
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    assert_eq!(
        *worker.pings.lock().unwrap(),
        vec![(
            "http://127.0.0.1:9/worker".to_string(),
            Some("vendor-42".to_string())
        )]
    );
    assert_eq!(api.transitions(), vec![(42, AttemptAction::Error)]);

    let view = session.view().await;
    assert_eq!(
        view.ui_state,
        Some(UiState::Error {
            exam_type: ExamType::Proctored
        })
    );
    assert!(view.timer.is_none());
}

#[tokio::test(start_paused = true)]
async fn reaching_the_limit_submits_the_attempt() {
    let attempt = json!({
        "attempt_id": 7,
        "attempt_status": "started",
        "time_remaining_seconds": 3,
        "time_limit_mins": 1
    });
    let api = FakeApi::new(exam_json("timed", &attempt), attempt);
    let session = session_with(
        api.clone(),
        FakeWorker::silent(),
        SessionSettings::default(),
    );

    session
        .fetch_exam_attempts(COURSE_ID, SEQUENCE_ID)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    let view = session.view().await;
    assert!(view.time_is_over);
    assert_eq!(view.ui_state, Some(UiState::ExamContent));
    assert!(view.timer.is_some_and(|t| t.display.is_zero()));
    assert!(api.transitions().is_empty());

    // Grace period of 5s: the limit is reached at -6.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.transitions(), vec![(7, AttemptAction::Submit)]);

    let view = session.view().await;
    assert_eq!(
        view.ui_state,
        Some(UiState::Submitted {
            exam_type: ExamType::Timed
        })
    );
    assert!(session.timer_snapshot().is_none());
}

#[tokio::test(start_paused = true)]
async fn poll_moves_the_deadline() {
    let attempt = json!({
        "attempt_id": 9,
        "attempt_status": "started",
        "time_remaining_seconds": 300
    });
    let api = FakeApi::new(exam_json("timed", &attempt), attempt);
    api.state.lock().unwrap().poll_remaining = Some(100);
    let session = session_with(
        api.clone(),
        FakeWorker::silent(),
        SessionSettings::default(),
    );

    session
        .fetch_exam_attempts(COURSE_ID, SEQUENCE_ID)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let snapshot = session.timer_snapshot().unwrap();
    assert_eq!(snapshot.seconds_left, 98);

    let state = session.state().await;
    let active = state.active_attempt.unwrap();
    assert_eq!(active.time_remaining_seconds, 100);
    assert_eq!(
        state.exam.unwrap().attempt.unwrap().time_remaining_seconds,
        100
    );
}

#[tokio::test(start_paused = true)]
async fn poll_of_finished_attempt_refetches_and_unmounts() {
    let attempt = json!({
        "attempt_id": 9,
        "attempt_status": "started",
        "time_remaining_seconds": 300
    });
    let api = FakeApi::new(exam_json("timed", &attempt), attempt);
    let session = session_with(
        api.clone(),
        FakeWorker::silent(),
        SessionSettings {
            poll_interval_secs: 5,
            ..SessionSettings::default()
        },
    );

    session
        .fetch_exam_attempts(COURSE_ID, SEQUENCE_ID)
        .await
        .unwrap();
    assert!(session.timer_snapshot().is_some());

    api.finish_attempt(9, "submitted");
    tokio::time::sleep(Duration::from_millis(6_500)).await;

    assert!(session.timer_snapshot().is_none());
    assert!(api.state.lock().unwrap().fetches >= 2);
    assert_eq!(
        session.view().await.ui_state,
        Some(UiState::Submitted {
            exam_type: ExamType::Timed
        })
    );
}

#[tokio::test]
async fn actions_without_data_record_the_banner() {
    let api = FakeApi::new(json!({}), json!({}));
    let session = session_with(api, FakeWorker::silent(), SessionSettings::default());

    let err = session.submit_exam().await.unwrap_err();
    assert_eq!(
        err,
        AppError::MissingPrecondition(
            "Failed to submit exam. No active attempt was found.".to_string()
        )
    );

    let banner = session.view().await.api_error.unwrap();
    assert_eq!(banner.message, "Failed to submit exam. No active attempt was found.");
    assert_eq!(banner.details, None);

    session.dismiss_error().await;
    assert!(session.view().await.api_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_lms_ping_keeps_the_exam_running() {
    let attempt = proctored_attempt();
    let api = FakeApi::new(exam_json("proctored", &attempt), attempt);
    api.state.lock().unwrap().fail_pings = true;
    let worker = FakeWorker::echoing();
    let session = session_with(api.clone(), worker.clone(), SessionSettings::default());

    session
        .fetch_exam_attempts(COURSE_ID, SEQUENCE_ID)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    assert_eq!(worker.pings.lock().unwrap().len(), 1);
    assert_eq!(api.transitions(), vec![(42, AttemptAction::Ping)]);

    let view = session.view().await;
    assert_eq!(view.ui_state, Some(UiState::ExamContent));
    assert!(view.timer.is_some_and(|t| !t.finished));

    let banner = view.api_error.unwrap();
    assert_eq!(banner.message, "A system error has occurred with your exam.");
    assert!(banner.details.unwrap().contains("LMS returned 503"));
}

#[tokio::test(start_paused = true)]
async fn failed_poll_shows_banner_and_keeps_the_attempt() {
    let attempt = json!({
        "attempt_id": 9,
        "attempt_status": "started",
        "time_remaining_seconds": 300
    });
    let api = FakeApi::new(exam_json("timed", &attempt), attempt);
    api.state.lock().unwrap().fail_polls = true;
    let session = session_with(api.clone(), FakeWorker::silent(), SessionSettings::default());

    session
        .fetch_exam_attempts(COURSE_ID, SEQUENCE_ID)
        .await
        .unwrap();
    let deadline = session
        .state()
        .await
        .active_attempt
        .and_then(|a| a.timer_deadline);
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let view = session.view().await;
    let banner = view.api_error.unwrap();
    assert_eq!(banner.message, "A system error has occurred with your exam.");
    assert!(banner.details.unwrap().contains("LMS returned 502"));

    let active = view.active_attempt.unwrap();
    assert_eq!(active.attempt_status, AttemptStatus::Started);
    assert_eq!(active.time_remaining_seconds, 300);
    assert_eq!(active.timer_deadline, deadline);
    assert_eq!(view.timer.unwrap().seconds_left, 298);
    assert!(api.transitions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn expiry_submits_the_attempt_the_countdown_ran_for() {
    let attempt = json!({
        "attempt_id": 8,
        "attempt_status": "started",
        "time_remaining_seconds": 300
    });
    let api = FakeApi::new(exam_json("timed", &attempt), attempt);
    let session = session_with(api.clone(), FakeWorker::silent(), SessionSettings::default());

    session
        .fetch_exam_attempts(COURSE_ID, SEQUENCE_ID)
        .await
        .unwrap();

    // Attempt 7's countdown expires after attempt 8 became active.
    session.expire_exam(7).await.unwrap();

    assert_eq!(api.transitions(), vec![(7, AttemptAction::Submit)]);
    let view = session.view().await;
    assert!(!view.time_is_over);
    assert_eq!(view.active_attempt.and_then(|a| a.attempt_id), Some(8));
    assert_eq!(view.ui_state, Some(UiState::ExamContent));
}
