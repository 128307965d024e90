// src/session.rs

//! Learner-side exam session.
//!
//! Holds the exam and attempt last fetched from the LMS, performs the
//! status-changing actions, and keeps exactly one countdown mounted while
//! the active attempt is running.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    bus::{EventBus, Handler, TimerEvent},
    client::{AttemptApi, PollTarget},
    config::{Config, DEFAULT_PING_INTERVAL_SECS, TIMER_GRACE_PERIOD_SECS, TIMER_POLL_INTERVAL_SECS},
    error::AppError,
    models::{
        attempt::{Attempt, AttemptAction},
        exam::{Exam, ExamAttemptsData},
        view::{ApiErrorBanner, ExamView},
    },
    router::{RouteInput, route},
    timer::{self, Clock, TimerConfig, TimerHandle, TimerHooks, TimerSnapshot, WorkerHeartbeat},
    worker::WorkerChannel,
};

/// Generic banner text for failures reported by the LMS.
const SYSTEM_ERROR_MESSAGE: &str = "A system error has occurred with your exam.";

/// Countdown settings applied to every mounted timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub poll_interval_secs: u64,
    pub grace_period_secs: i64,
    pub ping_timeout_secs: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: TIMER_POLL_INTERVAL_SECS,
            grace_period_secs: TIMER_GRACE_PERIOD_SECS,
            ping_timeout_secs: None,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval_secs: config.poll_interval_secs,
            grace_period_secs: config.grace_period_secs,
            ping_timeout_secs: config.ping_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub course_id: Option<String>,
    pub sequence_id: Option<String>,
    pub exam: Option<Exam>,
    pub active_attempt: Option<Attempt>,
    pub skip_proctoring: bool,
    pub time_is_over: bool,
    pub api_error: Option<ApiErrorBanner>,
}

/// Identifiers captured when a countdown is mounted.
///
/// Heartbeat escalation and polling use these rather than whatever exam is
/// displayed when they fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedAttempt {
    pub course_id: Option<String>,
    pub sequence_id: Option<String>,
    pub attempt_id: i64,
    pub external_id: Option<String>,
    pub poll_url: Option<String>,
}

struct MountedTimer {
    attempt_id: i64,
    handle: TimerHandle,
}

pub struct ExamSession {
    api: Arc<dyn AttemptApi>,
    worker: Arc<dyn WorkerChannel>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    state: RwLock<SessionState>,
    timer: Mutex<Option<MountedTimer>>,
    me: Weak<ExamSession>,
}

impl ExamSession {
    pub fn new(
        api: Arc<dyn AttemptApi>,
        worker: Arc<dyn WorkerChannel>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            api,
            worker,
            clock,
            settings,
            state: RwLock::new(SessionState::default()),
            timer: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Copy of the current state.
    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Snapshot of the mounted countdown, if any.
    pub fn timer_snapshot(&self) -> Option<TimerSnapshot> {
        self.lock_timer().as_ref().map(|m| m.handle.snapshot())
    }

    /// Routed screen plus the data the UI shell draws it with.
    pub async fn view(&self) -> ExamView {
        let state = self.state.read().await;
        let ui_state = state.exam.as_ref().map(|exam| {
            let input = RouteInput::from_exam(exam)
                .skip_proctoring(state.skip_proctoring)
                .time_is_over(state.time_is_over);
            route(&input)
        });

        ExamView {
            ui_state,
            exam: state.exam.clone(),
            active_attempt: state.active_attempt.clone(),
            timer: self.timer_snapshot(),
            skip_proctoring: state.skip_proctoring,
            time_is_over: state.time_is_over,
            api_error: state.api_error.clone(),
        }
    }

    /// Loads the exam of `sequence_id` and the course's active attempt.
    pub async fn fetch_exam_attempts(
        &self,
        course_id: &str,
        sequence_id: &str,
    ) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            if state.sequence_id.as_deref() != Some(sequence_id) {
                state.skip_proctoring = false;
            }
            state.course_id = Some(course_id.to_string());
            state.sequence_id = Some(sequence_id.to_string());
        }

        match self.api.fetch_exam_attempts(course_id, sequence_id).await {
            Ok(data) => {
                self.apply_data(data).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(course_id, sequence_id, "Failed to fetch exam attempts: {}", e.message());
                self.record_error(&e).await;
                Err(e)
            }
        }
    }

    /// Refetches the exam currently on display.
    pub async fn refresh(&self) -> Result<(), AppError> {
        let (course_id, sequence_id) = {
            let state = self.state.read().await;
            (state.course_id.clone(), state.sequence_id.clone())
        };
        match (course_id, sequence_id) {
            (Some(course_id), Some(sequence_id)) => {
                self.fetch_exam_attempts(&course_id, &sequence_id).await
            }
            _ => Err(self
                .missing("Failed to refresh exam. No exam has been loaded.")
                .await),
        }
    }

    pub async fn start_timed_exam(&self) -> Result<(), AppError> {
        let exam_id = self
            .exam_id("Failed to start exam. No exam id was found.")
            .await?;
        self.create_attempt(exam_id, true, false).await
    }

    pub async fn create_proctored_attempt(&self) -> Result<(), AppError> {
        let exam_id = self
            .exam_id("Failed to create exam attempt. No exam id was found.")
            .await?;
        self.create_attempt(exam_id, false, true).await
    }

    pub async fn start_proctored_exam(&self) -> Result<(), AppError> {
        let attempt_id = self
            .exam_attempt_id("Failed to start exam. No attempt id was found.")
            .await?;
        self.transition(attempt_id, AttemptAction::Start).await
    }

    /// Shows or hides the skip-proctoring confirmation.
    pub async fn skip_proctoring(&self, requested: bool) {
        self.state.write().await.skip_proctoring = requested;
    }

    /// Takes the exam without proctoring after the learner confirmed.
    pub async fn skip_proctored_exam(&self) -> Result<(), AppError> {
        let exam_id = self
            .exam_id("Failed to skip proctored exam. No exam id was found.")
            .await?;
        let existing = {
            let state = self.state.read().await;
            state
                .exam
                .as_ref()
                .and_then(|e| e.attempt.as_ref())
                .and_then(|a| a.attempt_id)
        };

        let result = match existing {
            Some(attempt_id) => self.transition(attempt_id, AttemptAction::Decline).await,
            None => self.create_attempt(exam_id, false, false).await,
        };
        self.state.write().await.skip_proctoring = false;
        result
    }

    pub async fn click_download_software(&self) -> Result<(), AppError> {
        let attempt_id = self
            .exam_attempt_id("Failed to download proctoring software. No attempt id was found.")
            .await?;
        self.transition(attempt_id, AttemptAction::ClickDownloadSoftware)
            .await
    }

    /// Resumes a running attempt from the submit confirmation.
    pub async fn continue_exam(&self) -> Result<(), AppError> {
        let attempt_id = self
            .active_attempt_id("Failed to continue exam. No attempt id was found.")
            .await?;
        self.transition(attempt_id, AttemptAction::Start).await
    }

    pub async fn stop_exam(&self) -> Result<(), AppError> {
        let attempt_id = self
            .active_attempt_id("Failed to stop exam. No active attempt was found.")
            .await?;
        self.transition(attempt_id, AttemptAction::Stop).await
    }

    pub async fn submit_exam(&self) -> Result<(), AppError> {
        let attempt_id = self
            .active_attempt_id("Failed to submit exam. No active attempt was found.")
            .await?;
        self.transition(attempt_id, AttemptAction::Submit).await
    }

    pub async fn reset_exam(&self) -> Result<(), AppError> {
        let attempt_id = self
            .exam_attempt_id("Failed to reset exam attempt. No attempt id was found.")
            .await?;
        self.transition(attempt_id, AttemptAction::ResetAttempt).await
    }

    pub async fn decline_exam(&self) -> Result<(), AppError> {
        let attempt_id = self
            .exam_attempt_id("Failed to decline exam. No attempt id was found.")
            .await?;
        self.transition(attempt_id, AttemptAction::Decline).await
    }

    /// Hands in the attempt whose countdown ran past its grace period.
    ///
    /// `attempt_id` is the attempt the countdown was mounted for, which may
    /// no longer be the active one when this runs.
    pub async fn expire_exam(&self, attempt_id: i64) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;
            if state.active_attempt.as_ref().and_then(|a| a.attempt_id) == Some(attempt_id) {
                state.time_is_over = true;
            }
        }
        tracing::info!(attempt_id, "exam time limit reached, submitting attempt");
        self.transition(attempt_id, AttemptAction::Submit).await
    }

    /// Reconciles the pinned attempt with the server.
    pub async fn poll_attempt(&self, pinned: &PinnedAttempt) -> Result<(), AppError> {
        let target = PollTarget::resolve(pinned.poll_url.as_deref(), pinned.sequence_id.as_deref());
        let poll = match self.api.poll_attempt(target).await {
            Ok(Some(poll)) => poll,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.record_error(&e).await;
                return Err(e);
            }
        };

        let now = self.clock.now();
        let still_running = {
            let mut state = self.state.write().await;
            let Some(active) = state
                .active_attempt
                .as_mut()
                .filter(|a| a.attempt_id == Some(pinned.attempt_id))
            else {
                return Ok(());
            };
            active.apply_poll(&poll, now);
            let updated = active.clone();

            if let Some(own) = state
                .exam
                .as_mut()
                .and_then(|e| e.attempt.as_mut())
                .filter(|a| a.attempt_id == Some(pinned.attempt_id))
            {
                *own = updated.clone();
            }
            updated.attempt_status.is_timed()
        };

        if still_running {
            self.sync_timer().await;
            Ok(())
        } else {
            tracing::info!(
                attempt_id = pinned.attempt_id,
                status = %poll.status,
                "attempt left the running state, refetching"
            );
            self.refresh().await
        }
    }

    /// Pings the proctoring worker, then reports the ping to the LMS.
    ///
    /// Only a worker that does not echo is an error here. A failed LMS
    /// `ping` is shown on the banner and the exam keeps running.
    pub async fn ping_attempt(
        &self,
        pinned: &PinnedAttempt,
        heartbeat: &WorkerHeartbeat,
    ) -> Result<(), AppError> {
        let timeout = Duration::from_secs(
            self.settings
                .ping_timeout_secs
                .unwrap_or(heartbeat.ping_interval_secs),
        );
        self.worker
            .ping(&heartbeat.worker_url, timeout, pinned.external_id.as_deref())
            .await?;

        if let Err(e) = self
            .api
            .transition_attempt(pinned.attempt_id, AttemptAction::Ping)
            .await
        {
            tracing::warn!(
                attempt_id = pinned.attempt_id,
                "Failed to report worker ping: {}",
                e.message()
            );
            self.record_error(&e).await;
        }
        Ok(())
    }

    /// Ends the pinned attempt after the proctoring worker stopped answering.
    pub async fn end_exam_with_failure(&self, pinned: &PinnedAttempt, message: &str) {
        tracing::error!(
            attempt_id = pinned.attempt_id,
            "Ending exam after heartbeat failure: {}",
            message
        );

        if let Err(e) = self
            .api
            .transition_attempt(pinned.attempt_id, AttemptAction::Error)
            .await
        {
            tracing::error!(attempt_id = pinned.attempt_id, "Failed to end exam: {}", e.message());
            self.record_error(&e).await;
            return;
        }

        if let Err(e) = self.refresh().await {
            tracing::warn!("Refetch after ending exam failed: {}", e.message());
        }
    }

    pub async fn dismiss_error(&self) {
        self.state.write().await.api_error = None;
    }

    pub async fn toggle_error_details(&self) {
        if let Some(banner) = self.state.write().await.api_error.as_mut() {
            banner.show_details = !banner.show_details;
        }
    }

    async fn create_attempt(
        &self,
        exam_id: i64,
        start_clock: bool,
        attempt_proctored: bool,
    ) -> Result<(), AppError> {
        if let Err(e) = self
            .api
            .create_attempt(exam_id, start_clock, attempt_proctored)
            .await
        {
            self.record_error(&e).await;
            return Err(e);
        }
        self.refresh().await
    }

    async fn transition(&self, attempt_id: i64, action: AttemptAction) -> Result<(), AppError> {
        if let Err(e) = self.api.transition_attempt(attempt_id, action).await {
            tracing::error!(
                attempt_id,
                action = action.as_str(),
                "Attempt transition failed: {}",
                e.message()
            );
            self.record_error(&e).await;
            return Err(e);
        }
        self.refresh().await
    }

    async fn apply_data(&self, data: ExamAttemptsData) {
        let now = self.clock.now();
        let ExamAttemptsData {
            mut exam,
            mut active_attempt,
        } = data;

        if let Some(attempt) = exam.as_mut().and_then(|e| e.attempt.as_mut()) {
            attempt.stamp_deadline(now);
        }
        if let Some(attempt) = active_attempt.as_mut() {
            attempt.stamp_deadline(now);
        }

        {
            let mut state = self.state.write().await;
            let previous = state.active_attempt.as_ref().and_then(|a| a.attempt_id);
            let current = active_attempt.as_ref().and_then(|a| a.attempt_id);
            if previous != current {
                state.time_is_over = false;
            }
            state.exam = exam;
            state.active_attempt = active_attempt;
        }

        self.sync_timer().await;
    }

    /// Mounts, reconciles or tears down the countdown to match the active attempt.
    async fn sync_timer(&self) {
        let state = self.state.read().await;
        let running = state.active_attempt.as_ref().filter(|a| {
            a.attempt_status.is_timed() && a.has_id() && a.timer_deadline.is_some()
        });

        let mut timer = self.lock_timer();
        match (timer.as_ref(), running) {
            (Some(mounted), Some(attempt)) if Some(mounted.attempt_id) == attempt.attempt_id => {
                if let Some(deadline) = attempt.timer_deadline {
                    mounted.handle.reconcile(deadline);
                }
            }
            (_, Some(attempt)) => {
                *timer = self.mount_timer(&state, attempt);
            }
            (Some(mounted), None) => {
                tracing::debug!(attempt_id = mounted.attempt_id, "unmounting exam timer");
                *timer = None;
            }
            (None, None) => {}
        }
    }

    fn mount_timer(&self, state: &SessionState, attempt: &Attempt) -> Option<MountedTimer> {
        let attempt_id = attempt.attempt_id?;
        let deadline = attempt.timer_deadline?;

        let time_limit_mins = attempt
            .time_limit_mins
            .or_else(|| {
                state
                    .exam
                    .as_ref()
                    .filter(|e| e.attempt.as_ref().and_then(|a| a.attempt_id) == Some(attempt_id))
                    .map(|e| e.time_limit_mins)
            })
            .unwrap_or_else(|| (attempt.time_remaining_seconds + 59) / 60);

        let heartbeat = attempt
            .desktop_application_js_url
            .as_ref()
            .filter(|url| !url.is_empty())
            .map(|url| WorkerHeartbeat {
                worker_url: url.clone(),
                ping_interval_secs: attempt.ping_interval.unwrap_or(DEFAULT_PING_INTERVAL_SECS),
            });

        let pinned = PinnedAttempt {
            course_id: state.course_id.clone(),
            sequence_id: state.sequence_id.clone(),
            attempt_id,
            external_id: attempt.external_id.clone(),
            poll_url: attempt.exam_started_poll_url.clone(),
        };

        let bus = Arc::new(EventBus::new());
        self.subscribe_timer_events(&bus, attempt_id);

        let config = TimerConfig::new(time_limit_mins, deadline)
            .with_poll_interval(self.settings.poll_interval_secs)
            .with_grace_period(self.settings.grace_period_secs)
            .with_heartbeat(heartbeat);

        let hooks = Arc::new(SessionTimerHooks {
            session: self.me.clone(),
            pinned,
        });

        tracing::info!(attempt_id, %deadline, time_limit_mins, "mounting exam timer");
        Some(MountedTimer {
            attempt_id,
            handle: timer::spawn(config, bus, self.clock.clone(), hooks),
        })
    }

    fn subscribe_timer_events(&self, bus: &EventBus, attempt_id: i64) {
        let session = self.me.clone();
        let reached_null: Handler = Arc::new(move |_| {
            let session = session.clone();
            tokio::spawn(async move {
                if let Some(session) = session.upgrade() {
                    session.state.write().await.time_is_over = true;
                }
            });
        });
        bus.once(TimerEvent::ReachedNull, reached_null);

        let session = self.me.clone();
        let limit_reached: Handler = Arc::new(move |_| {
            let session = session.clone();
            tokio::spawn(async move {
                if let Some(session) = session.upgrade() {
                    if let Err(e) = session.expire_exam(attempt_id).await {
                        tracing::error!("Failed to expire exam: {}", e.message());
                    }
                }
            });
        });
        bus.once(TimerEvent::LimitReached, limit_reached);
    }

    async fn exam_id(&self, failure: &str) -> Result<i64, AppError> {
        let id = self.state.read().await.exam.as_ref().map(|e| e.id);
        match id {
            Some(id) => Ok(id),
            None => Err(self.missing(failure).await),
        }
    }

    async fn exam_attempt_id(&self, failure: &str) -> Result<i64, AppError> {
        let id = self
            .state
            .read()
            .await
            .exam
            .as_ref()
            .and_then(|e| e.attempt.as_ref())
            .and_then(|a| a.attempt_id);
        match id {
            Some(id) => Ok(id),
            None => Err(self.missing(failure).await),
        }
    }

    async fn active_attempt_id(&self, failure: &str) -> Result<i64, AppError> {
        let id = self
            .state
            .read()
            .await
            .active_attempt
            .as_ref()
            .and_then(|a| a.attempt_id);
        match id {
            Some(id) => Ok(id),
            None => Err(self.missing(failure).await),
        }
    }

    async fn missing(&self, message: &str) -> AppError {
        tracing::error!("{}", message);
        let error = AppError::MissingPrecondition(message.to_string());
        self.record_error(&error).await;
        error
    }

    async fn record_error(&self, error: &AppError) {
        let banner = match error {
            AppError::Upstream(detail) | AppError::InternalServerError(detail) => {
                ApiErrorBanner::new(SYSTEM_ERROR_MESSAGE, Some(detail.as_str()))
            }
            other => ApiErrorBanner::new(other.message(), None),
        };
        self.state.write().await.api_error = Some(banner);
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<MountedTimer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Timer callbacks bound to the attempt that was running at mount time.
struct SessionTimerHooks {
    session: Weak<ExamSession>,
    pinned: PinnedAttempt,
}

#[async_trait]
impl TimerHooks for SessionTimerHooks {
    async fn poll_attempt(&self) -> Result<(), AppError> {
        match self.session.upgrade() {
            Some(session) => session.poll_attempt(&self.pinned).await,
            None => Ok(()),
        }
    }

    async fn ping_worker(&self, heartbeat: &WorkerHeartbeat) -> Result<(), AppError> {
        match self.session.upgrade() {
            Some(session) => session.ping_attempt(&self.pinned, heartbeat).await,
            None => Ok(()),
        }
    }

    async fn heartbeat_failed(&self, error: AppError) {
        if let Some(session) = self.session.upgrade() {
            session
                .end_exam_with_failure(&self.pinned, error.message())
                .await;
        }
    }
}
