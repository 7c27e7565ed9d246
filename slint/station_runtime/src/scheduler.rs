use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_POLL_INTERVAL;
use crate::phase::Timestamp;
use crate::remote::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    NotDue,
    Due,
    // Due by the clock, but the authority has not published a trigger newer
    // than the one already acted on.
    Suppressed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerGuard {
    last_fired: Option<Timestamp>,
    previous: Option<Timestamp>,
}

impl TriggerGuard {
    pub fn decide(&self, clock: Timestamp, next_trigger: Timestamp) -> TriggerDecision {
        if clock < next_trigger {
            return TriggerDecision::NotDue;
        }

        match self.last_fired {
            Some(fired) if next_trigger <= fired => TriggerDecision::Suppressed,
            _ => TriggerDecision::Due,
        }
    }

    pub fn mark_fired(&mut self, trigger: Timestamp) {
        self.previous = self.last_fired;
        self.last_fired = Some(trigger);
    }

    pub fn rollback(&mut self, trigger: Timestamp) {
        if self.last_fired == Some(trigger) {
            self.last_fired = self.previous.take();
        }
    }

    pub fn reset(&mut self) {
        *self = TriggerGuard::default();
    }

    pub fn last_fired(&self) -> Option<Timestamp> {
        self.last_fired
    }
}

#[derive(Debug)]
pub struct ExecutionScheduler {
    period: Duration,
    ticker: Option<Interval>,
    guard: TriggerGuard,
    failed_polls: u64,
    skipped_ticks: u64,
}

impl ExecutionScheduler {
    pub fn new(period: Duration) -> Self {
        let period = if period.is_zero() {
            warn!(
                default_ms = DEFAULT_POLL_INTERVAL.as_millis() as u64,
                "zero poll interval; using default"
            );
            DEFAULT_POLL_INTERVAL
        } else {
            period
        };

        Self {
            period,
            ticker: None,
            guard: TriggerGuard::default(),
            failed_polls: 0,
            skipped_ticks: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> SchedulerState {
        if self.ticker.is_some() {
            SchedulerState::Polling
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_polling(&self) -> bool {
        self.state() == SchedulerState::Polling
    }

    pub fn sync_activity(&mut self, active: bool) {
        match (active, self.ticker.is_some()) {
            (true, false) => {
                let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.ticker = Some(ticker);
                info!(period_ms = self.period.as_millis() as u64, "execution polling started");
            }
            (false, true) => {
                self.ticker = None;
                info!("execution polling stopped");
            }
            _ => {}
        }
    }

    pub fn stop(&mut self) {
        self.sync_activity(false);
    }

    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    pub fn observe(&mut self, clock: Timestamp, next_trigger: Timestamp) -> TriggerDecision {
        let decision = self.guard.decide(clock, next_trigger);

        match decision {
            TriggerDecision::Due => {
                self.guard.mark_fired(next_trigger);
                info!(%clock, %next_trigger, "trigger due; submitting advance");
            }
            TriggerDecision::Suppressed => {
                debug!(
                    %clock,
                    %next_trigger,
                    "trigger already acted on; waiting for a newer trigger"
                );
            }
            TriggerDecision::NotDue => {}
        }

        decision
    }

    // Only a request that may never have reached the authority is retried.
    // A refusal keeps the guard set until a newer trigger is observed.
    pub fn advance_failed(&mut self, trigger: Timestamp, err: &RemoteError) {
        if err.is_transient() {
            self.guard.rollback(trigger);
            warn!(%trigger, error = %err, "advance submit failed; trigger will be retried");
        } else {
            warn!(%trigger, error = %err, "advance refused; waiting for a newer trigger");
        }
    }

    pub fn poll_failed(&mut self, err: &RemoteError) {
        self.failed_polls += 1;
        warn!(error = %err, failed_polls = self.failed_polls, "poll tick failed");
    }

    pub fn tick_skipped(&mut self) {
        self.skipped_ticks += 1;
        debug!(
            skipped_ticks = self.skipped_ticks,
            "poll tick skipped; remote call still in flight"
        );
    }

    pub fn reset_guard(&mut self) {
        self.guard.reset();
    }

    pub fn guard(&self) -> &TriggerGuard {
        &self.guard
    }

    pub fn failed_polls(&self) -> u64 {
        self.failed_polls
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks
    }
}
