use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::phase::{Phase, Timestamp};
use crate::remote::{RemoteError, RemoteEvent, RemoteStateClient, Subscription, SubscriptionId};

const LISTENER_QUEUE_CAP: usize = 32;

#[derive(Debug)]
struct Listener {
    id: SubscriptionId,
    event: RemoteEvent,
    tx: mpsc::Sender<RemoteEvent>,
}

#[derive(Debug)]
struct AuthorityState {
    phase: Phase,
    clock: Timestamp,
    next_trigger: Timestamp,
    listeners: Vec<Listener>,
    failures_pending: u32,
}

#[derive(Debug)]
pub struct LocalAuthority {
    state: Mutex<AuthorityState>,
    phase_seconds: u64,
    next_subscription_id: AtomicU64,
    advance_calls: AtomicU64,
}

impl LocalAuthority {
    pub fn new(start_clock: Timestamp, phase_seconds: u64) -> Self {
        Self {
            state: Mutex::new(AuthorityState {
                phase: Phase::Idle,
                clock: start_clock,
                next_trigger: start_clock,
                listeners: Vec::new(),
                failures_pending: 0,
            }),
            phase_seconds: phase_seconds.max(1),
            next_subscription_id: AtomicU64::new(1),
            advance_calls: AtomicU64::new(0),
        }
    }

    pub fn advance_calls(&self) -> u64 {
        self.advance_calls.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self, event: RemoteEvent) -> usize {
        self.with_state(|state| {
            state
                .listeners
                .iter()
                .filter(|listener| listener.event == event)
                .count()
        })
        .unwrap_or(0)
    }

    pub fn inject_failures(&self, count: u32) {
        if let Err(err) = self.with_state(|state| state.failures_pending = count) {
            warn!(error = %err, count, "failure injection ignored");
        }
    }

    pub fn notify(&self, event: RemoteEvent) {
        if let Err(err) = self.with_state(|state| emit(state, event)) {
            warn!(error = %err, event = event.name(), "notification not emitted");
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut AuthorityState) -> T) -> Result<T, RemoteError> {
        let Ok(mut state) = self.state.lock() else {
            return Err(RemoteError::Unavailable(
                "local authority state lock poisoned".to_string(),
            ));
        };

        Ok(f(&mut state))
    }

    fn call<T>(
        &self,
        f: impl FnOnce(&mut AuthorityState) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        self.with_state(|state| {
            if state.failures_pending > 0 {
                state.failures_pending -= 1;
                return Err(RemoteError::Unavailable("injected failure".to_string()));
            }

            f(state)
        })?
    }
}

#[async_trait]
impl RemoteStateClient for LocalAuthority {
    async fn read_phase(&self) -> Result<Phase, RemoteError> {
        self.call(|state| Ok(state.phase))
    }

    async fn read_next_trigger_time(&self) -> Result<Timestamp, RemoteError> {
        self.call(|state| Ok(state.next_trigger))
    }

    async fn read_clock(&self) -> Result<Timestamp, RemoteError> {
        self.call(|state| Ok(state.clock))
    }

    async fn submit_create(&self) -> Result<(), RemoteError> {
        let phase_seconds = self.phase_seconds;

        self.call(|state| {
            if state.phase.is_active() {
                return Err(RemoteError::Rejected {
                    operation: "create",
                    reason: "a group is already active".to_string(),
                });
            }

            state.phase = Phase::SubmissionOpen;
            state.next_trigger = state.clock.saturating_add_secs(phase_seconds);
            Ok(())
        })
    }

    async fn submit_close(&self) -> Result<(), RemoteError> {
        self.call(|state| {
            if !state.phase.is_active() {
                return Err(RemoteError::Rejected {
                    operation: "close",
                    reason: "no active group".to_string(),
                });
            }

            state.phase = Phase::Idle;
            state.next_trigger = state.clock;
            emit(state, RemoteEvent::HideEmbeddedView);
            Ok(())
        })
    }

    async fn submit_advance(&self) -> Result<(), RemoteError> {
        self.advance_calls.fetch_add(1, Ordering::Relaxed);
        let phase_seconds = self.phase_seconds;

        self.call(|state| {
            if !state.phase.is_active() {
                return Err(RemoteError::Rejected {
                    operation: "advance",
                    reason: "no active group".to_string(),
                });
            }

            if state.clock < state.next_trigger {
                return Err(RemoteError::Rejected {
                    operation: "advance",
                    reason: format!(
                        "trigger not due: clock={} next_trigger={}",
                        state.clock, state.next_trigger
                    ),
                });
            }

            state.phase = next_in_cycle(state.phase);
            state.next_trigger = state.clock.saturating_add_secs(phase_seconds);
            debug!(phase = %state.phase, next_trigger = %state.next_trigger, "local authority advanced");
            emit(state, RemoteEvent::ShowEmbeddedView);
            Ok(())
        })
    }

    async fn advance_clock(&self, seconds: u64) -> Result<(), RemoteError> {
        self.call(|state| {
            state.clock = state.clock.saturating_add_secs(seconds);
            Ok(())
        })
    }

    fn subscribe(&self, event: RemoteEvent) -> Result<Subscription, RemoteError> {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        let (tx, events) = mpsc::channel(LISTENER_QUEUE_CAP);

        self.with_state(|state| state.listeners.push(Listener { id, event, tx }))?;

        Ok(Subscription { id, event, events })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.with_state(|state| state.listeners.retain(|listener| listener.id != id));
        if let Err(err) = removed {
            warn!(error = %err, subscription = id.0, "listener not removed");
        }
    }
}

fn next_in_cycle(phase: Phase) -> Phase {
    match phase {
        Phase::Idle => Phase::Idle,
        Phase::SubmissionOpen => Phase::SubmissionClose,
        Phase::SubmissionClose => Phase::VotingOpen,
        Phase::VotingOpen => Phase::VotingClose,
        Phase::VotingClose => Phase::SubmissionOpen,
    }
}

fn emit(state: &mut AuthorityState, event: RemoteEvent) {
    state.listeners.retain(|listener| {
        if listener.event != event {
            return true;
        }

        match listener.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(event = event.name(), "listener queue full; notification dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn authority() -> LocalAuthority {
        LocalAuthority::new(Timestamp::from_secs(1_000), 30)
    }

    #[tokio::test]
    async fn create_opens_submission_with_trigger_one_phase_ahead() {
        let authority = authority();
        authority.submit_create().await.expect("create");

        assert_eq!(authority.read_phase().await, Ok(Phase::SubmissionOpen));
        assert_eq!(
            authority.read_next_trigger_time().await,
            Ok(Timestamp::from_secs(1_030))
        );
    }

    #[tokio::test]
    async fn advance_is_rejected_until_trigger_is_due() {
        let authority = authority();
        authority.submit_create().await.expect("create");

        let err = authority.submit_advance().await.expect_err("not due yet");
        assert!(matches!(err, RemoteError::Rejected { operation: "advance", .. }));
        assert_eq!(authority.read_phase().await, Ok(Phase::SubmissionOpen));

        authority.advance_clock(30).await.expect("advance clock");
        authority.submit_advance().await.expect("due now");
        assert_eq!(authority.read_phase().await, Ok(Phase::SubmissionClose));
        assert_eq!(authority.advance_calls(), 2);
    }

    #[tokio::test]
    async fn cycle_wraps_back_to_submission() {
        let authority = authority();
        authority.submit_create().await.expect("create");

        for expected in [
            Phase::SubmissionClose,
            Phase::VotingOpen,
            Phase::VotingClose,
            Phase::SubmissionOpen,
        ] {
            authority.advance_clock(30).await.expect("advance clock");
            authority.submit_advance().await.expect("advance");
            assert_eq!(authority.read_phase().await, Ok(expected));
        }
    }

    #[tokio::test]
    async fn close_returns_to_idle_and_emits_hide() {
        let authority = authority();
        let mut hide = authority
            .subscribe(RemoteEvent::HideEmbeddedView)
            .expect("subscribe");
        authority.submit_create().await.expect("create");
        authority.submit_close().await.expect("close");

        assert_eq!(authority.read_phase().await, Ok(Phase::Idle));
        assert_eq!(hide.events.try_recv().ok(), Some(RemoteEvent::HideEmbeddedView));
        assert!(authority.submit_close().await.is_err());
    }

    #[tokio::test]
    async fn notifications_only_reach_matching_listeners() {
        let authority = authority();
        let mut show = authority
            .subscribe(RemoteEvent::ShowEmbeddedView)
            .expect("subscribe show");
        let mut hide = authority
            .subscribe(RemoteEvent::HideEmbeddedView)
            .expect("subscribe hide");

        authority.notify(RemoteEvent::ShowEmbeddedView);

        assert_eq!(show.events.try_recv().ok(), Some(RemoteEvent::ShowEmbeddedView));
        assert!(hide.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_removes_listener() {
        let authority = authority();
        let sub = authority
            .subscribe(RemoteEvent::ShowEmbeddedView)
            .expect("subscribe");
        assert_eq!(authority.listener_count(RemoteEvent::ShowEmbeddedView), 1);

        authority.unsubscribe(sub.id);
        assert_eq!(authority.listener_count(RemoteEvent::ShowEmbeddedView), 0);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let authority = authority();
        authority.inject_failures(2);

        assert!(matches!(
            authority.read_clock().await,
            Err(RemoteError::Unavailable(_))
        ));
        assert!(authority.read_phase().await.is_err());
        assert_eq!(authority.read_phase().await, Ok(Phase::Idle));
    }

    #[test]
    fn poisoned_state_is_reported_not_panicked() {
        let authority = Arc::new(authority());
        let poisoner = Arc::clone(&authority);
        let joined = std::thread::spawn(move || {
            let _state = poisoner.state.lock().expect("lock");
            panic!("poison the authority state");
        })
        .join();
        assert!(joined.is_err());

        authority.inject_failures(1);
        authority.notify(RemoteEvent::ShowEmbeddedView);
        authority.unsubscribe(SubscriptionId(1));

        assert!(authority.subscribe(RemoteEvent::ShowEmbeddedView).is_err());
        assert_eq!(authority.listener_count(RemoteEvent::ShowEmbeddedView), 0);
    }
}
