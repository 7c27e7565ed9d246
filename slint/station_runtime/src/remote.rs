use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::phase::{Phase, Timestamp};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote authority unavailable: {0}")]
    Unavailable(String),

    #[error("remote authority rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    #[error("remote authority reported unknown phase code {0}")]
    UnknownPhase(u64),

    #[error("{0} is not supported by this remote")]
    Unsupported(&'static str),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteEvent {
    ShowEmbeddedView,
    HideEmbeddedView,
}

impl RemoteEvent {
    pub const ALL: [RemoteEvent; 2] = [RemoteEvent::ShowEmbeddedView, RemoteEvent::HideEmbeddedView];

    pub const fn name(self) -> &'static str {
        match self {
            RemoteEvent::ShowEmbeddedView => "show-embedded-view",
            RemoteEvent::HideEmbeddedView => "hide-embedded-view",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        RemoteEvent::ALL.into_iter().find(|event| event.name() == name)
    }

    pub const fn visible(self) -> bool {
        matches!(self, RemoteEvent::ShowEmbeddedView)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub event: RemoteEvent,
    pub events: mpsc::Receiver<RemoteEvent>,
}

#[async_trait]
pub trait RemoteStateClient: Send + Sync {
    async fn read_phase(&self) -> Result<Phase, RemoteError>;

    async fn read_next_trigger_time(&self) -> Result<Timestamp, RemoteError>;

    async fn read_clock(&self) -> Result<Timestamp, RemoteError>;

    async fn submit_create(&self) -> Result<(), RemoteError>;

    async fn submit_close(&self) -> Result<(), RemoteError>;

    async fn submit_advance(&self) -> Result<(), RemoteError>;

    async fn advance_clock(&self, _seconds: u64) -> Result<(), RemoteError> {
        Err(RemoteError::Unsupported("advance_clock"))
    }

    fn subscribe(&self, event: RemoteEvent) -> Result<Subscription, RemoteError>;

    fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub phase: Phase,
    pub next_trigger: Timestamp,
    pub clock: Timestamp,
}

pub async fn read_snapshot(remote: &dyn RemoteStateClient) -> Result<RemoteSnapshot, RemoteError> {
    let clock = remote.read_clock().await?;
    let next_trigger = remote.read_next_trigger_time().await?;
    let phase = remote.read_phase().await?;

    Ok(RemoteSnapshot {
        phase,
        next_trigger,
        clock,
    })
}
