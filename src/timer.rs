// src/timer.rs

//! Countdown engine for a running attempt.
//!
//! [`Countdown`] holds the per-tick arithmetic and is driven synchronously;
//! [`spawn`] wraps it in a one-second tokio loop that publishes snapshots,
//! emits threshold events on the bus and fires reconciliation polls and
//! worker heartbeats.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{
    bus::{EventBus, TimerEvent, TimerPayload},
    config::{
        CRITICALLY_LOW_TIME_RATIO, LOW_TIME_RATIO, TIMER_GRACE_PERIOD_SECS,
        TIMER_POLL_INTERVAL_SECS,
    },
    error::AppError,
};

/// Remaining time as shown to the learner. Never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerDisplay {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl TimerDisplay {
    pub fn from_seconds(seconds_left: i64) -> Self {
        let total = seconds_left.max(0) as u64;
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.hours == 0 && self.minutes == 0 && self.seconds == 0
    }
}

impl fmt::Display for TimerDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// Which threshold events have fired during the current mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThresholdFlags {
    pub low: bool,
    pub critically_low: bool,
    pub reached_null: bool,
    pub limit_reached: bool,
}

impl ThresholdFlags {
    pub fn has_fired(&self, event: TimerEvent) -> bool {
        match event {
            TimerEvent::Low => self.low,
            TimerEvent::CriticallyLow => self.critically_low,
            TimerEvent::ReachedNull => self.reached_null,
            TimerEvent::LimitReached => self.limit_reached,
        }
    }

    fn mark(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Low => self.low = true,
            TimerEvent::CriticallyLow => self.critically_low = true,
            TimerEvent::ReachedNull => self.reached_null = true,
            TimerEvent::LimitReached => self.limit_reached = true,
        }
    }
}

/// Liveness ping settings for a proctored attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHeartbeat {
    pub worker_url: String,
    pub ping_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimerConfig {
    pub time_limit_mins: i64,
    pub deadline: DateTime<Utc>,
    pub poll_interval_secs: u64,
    pub grace_period_secs: i64,
    pub heartbeat: Option<WorkerHeartbeat>,
}

impl TimerConfig {
    pub fn new(time_limit_mins: i64, deadline: DateTime<Utc>) -> Self {
        Self {
            time_limit_mins,
            deadline,
            poll_interval_secs: TIMER_POLL_INTERVAL_SECS,
            grace_period_secs: TIMER_GRACE_PERIOD_SECS,
            heartbeat: None,
        }
    }

    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_grace_period(mut self, secs: i64) -> Self {
        self.grace_period_secs = secs;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Option<WorkerHeartbeat>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    fn low_threshold(&self) -> f64 {
        (self.time_limit_mins * 60) as f64 * LOW_TIME_RATIO
    }

    fn critically_low_threshold(&self) -> f64 {
        (self.time_limit_mins * 60) as f64 * CRITICALLY_LOW_TIME_RATIO
    }
}

/// Countdown state after a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerSnapshot {
    pub tick: u64,
    /// Signed; negative while inside the grace period.
    pub seconds_left: i64,
    pub display: TimerDisplay,
    pub fired: ThresholdFlags,
    pub finished: bool,
}

/// What a single tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub snapshot: TimerSnapshot,
    pub emitted: Vec<TimerEvent>,
    pub poll: bool,
    pub ping: bool,
}

/// Per-tick countdown arithmetic against a fixed deadline.
#[derive(Debug, Clone)]
pub struct Countdown {
    config: TimerConfig,
    tick: u64,
    fired: ThresholdFlags,
    finished: bool,
    last: TimerSnapshot,
}

impl Countdown {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config,
            tick: 0,
            fired: ThresholdFlags::default(),
            finished: false,
            last: TimerSnapshot::default(),
        }
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.config.deadline
    }

    /// Replaces the deadline after a successful reconciliation.
    pub fn set_deadline(&mut self, deadline: DateTime<Utc>) {
        self.config.deadline = deadline;
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.last
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whole seconds until the deadline, rounded towards negative infinity.
    pub fn seconds_left(&self, now: DateTime<Utc>) -> i64 {
        (self.config.deadline - now).num_milliseconds().div_euclid(1000)
    }

    /// Advances the countdown by one tick at wall time `now`.
    ///
    /// Returns `None` once the limit has been reached.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<TickReport> {
        if self.finished {
            return None;
        }
        let tick = self.tick;
        self.tick += 1;

        let seconds_left = self.seconds_left(now);
        let display = TimerDisplay::from_seconds(seconds_left);

        let mut emitted = Vec::new();
        let remaining = seconds_left as f64;
        if remaining <= self.config.critically_low_threshold() {
            self.fire(TimerEvent::CriticallyLow, &mut emitted);
        } else if remaining <= self.config.low_threshold() {
            self.fire(TimerEvent::Low, &mut emitted);
        }
        if seconds_left <= 0 {
            self.fire(TimerEvent::ReachedNull, &mut emitted);
        }
        if seconds_left < -self.config.grace_period_secs {
            self.fire(TimerEvent::LimitReached, &mut emitted);
            self.finished = true;
        }

        let poll = !self.finished
            && seconds_left >= 0
            && tick.checked_rem(self.config.poll_interval_secs) == Some(0);

        let ping = !self.finished
            && self.config.heartbeat.as_ref().is_some_and(|hb| {
                tick.checked_rem(hb.ping_interval_secs) == Some(hb.ping_interval_secs / 2)
            });

        self.last = TimerSnapshot {
            tick,
            seconds_left,
            display,
            fired: self.fired,
            finished: self.finished,
        };

        Some(TickReport {
            snapshot: self.last,
            emitted,
            poll,
            ping,
        })
    }

    fn fire(&mut self, event: TimerEvent, emitted: &mut Vec<TimerEvent>) {
        if !self.fired.has_fired(event) {
            self.fired.mark(event);
            emitted.push(event);
        }
    }
}

/// Source of wall time for the countdown.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time anchored once and advanced by tokio's monotonic clock.
///
/// Unaffected by wall-clock adjustments during an exam, and follows
/// `tokio::time::pause`/`advance` in tests.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_wall: DateTime<Utc>,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new(anchor_wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall,
            anchor: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().duration_since(self.anchor);
        self.anchor_wall
            + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }
}

/// Work the countdown hands off to its owner.
#[async_trait]
pub trait TimerHooks: Send + Sync + 'static {
    /// Refreshes the attempt from the server.
    async fn poll_attempt(&self) -> Result<(), AppError>;

    /// Pings the proctoring worker.
    async fn ping_worker(&self, heartbeat: &WorkerHeartbeat) -> Result<(), AppError>;

    /// Ends the exam after the worker stopped answering.
    async fn heartbeat_failed(&self, error: AppError);
}

/// Owner's side of a running countdown.
///
/// Dropping the handle stops the tick loop and detaches every bus listener.
pub struct TimerHandle {
    task: JoinHandle<()>,
    bus: Arc<EventBus>,
    snapshots: watch::Receiver<TimerSnapshot>,
    deadline: watch::Sender<DateTime<Utc>>,
}

impl TimerHandle {
    pub fn snapshot(&self) -> TimerSnapshot {
        *self.snapshots.borrow()
    }

    /// Threshold events fired so far; lets late subscribers catch up.
    pub fn fired(&self) -> ThresholdFlags {
        self.snapshots.borrow().fired
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.clone()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        *self.deadline.borrow()
    }

    /// Hands the loop a fresh deadline; applied on the next tick.
    pub fn reconcile(&self, deadline: DateTime<Utc>) {
        self.deadline.send_if_modified(|current| {
            if *current == deadline {
                false
            } else {
                *current = deadline;
                true
            }
        });
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
        self.bus.clear();
    }
}

/// Starts the tick loop.
///
/// The first tick runs one scheduler turn after this returns, so listeners
/// attached right after spawning still see events fired on tick 0.
pub fn spawn(
    config: TimerConfig,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    hooks: Arc<dyn TimerHooks>,
) -> TimerHandle {
    let (deadline_tx, deadline_rx) = watch::channel(config.deadline);
    let countdown = Countdown::new(config);
    let seconds_left = countdown.seconds_left(clock.now());
    let (snapshot_tx, snapshot_rx) = watch::channel(TimerSnapshot {
        seconds_left,
        display: TimerDisplay::from_seconds(seconds_left),
        ..TimerSnapshot::default()
    });

    let task = tokio::spawn(run(
        countdown,
        bus.clone(),
        clock,
        hooks,
        snapshot_tx,
        deadline_rx,
    ));

    TimerHandle {
        task,
        bus,
        snapshots: snapshot_rx,
        deadline: deadline_tx,
    }
}

async fn run(
    mut countdown: Countdown,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    hooks: Arc<dyn TimerHooks>,
    snapshots: watch::Sender<TimerSnapshot>,
    mut deadline: watch::Receiver<DateTime<Utc>>,
) {
    tokio::task::yield_now().await;

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(deadline = %countdown.deadline(), "exam timer started");

    loop {
        interval.tick().await;

        if deadline.has_changed().unwrap_or(false) {
            let fresh = *deadline.borrow_and_update();
            tracing::debug!(%fresh, "timer deadline reconciled");
            countdown.set_deadline(fresh);
        }

        let Some(report) = countdown.tick(clock.now()) else {
            break;
        };

        snapshots.send_replace(report.snapshot);

        let payload = TimerPayload {
            seconds_left: report.snapshot.seconds_left,
            display: report.snapshot.display,
        };
        for event in &report.emitted {
            bus.emit(*event, &payload);
        }

        if report.poll {
            let hooks = hooks.clone();
            tokio::spawn(async move {
                if let Err(e) = hooks.poll_attempt().await {
                    tracing::warn!("Attempt reconciliation failed: {}", e.message());
                }
            });
        }

        if report.ping {
            if let Some(heartbeat) = countdown.config().heartbeat.clone() {
                let hooks = hooks.clone();
                tokio::spawn(async move {
                    if let Err(e) = hooks.ping_worker(&heartbeat).await {
                        tracing::error!("Proctoring worker heartbeat failed: {}", e.message());
                        hooks.heartbeat_failed(e).await;
                    }
                });
            }
        }

        if report.snapshot.finished {
            tracing::info!("exam timer reached its limit");
            break;
        }
    }
}
