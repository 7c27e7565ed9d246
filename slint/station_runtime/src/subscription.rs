use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::remote::{RemoteError, RemoteEvent, RemoteStateClient, Subscription};

#[derive(Default)]
pub struct EventSubscriptionManager {
    remote: Option<Arc<dyn RemoteStateClient>>,
    show: Option<Subscription>,
    hide: Option<Subscription>,
}

impl EventSubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.show.is_some() || self.hide.is_some()
    }

    pub fn active_count(&self) -> usize {
        usize::from(self.show.is_some()) + usize::from(self.hide.is_some())
    }

    pub fn activate(&mut self, remote: Arc<dyn RemoteStateClient>) -> Result<(), RemoteError> {
        self.deactivate();

        let show = remote.subscribe(RemoteEvent::ShowEmbeddedView)?;
        let hide = match remote.subscribe(RemoteEvent::HideEmbeddedView) {
            Ok(hide) => hide,
            Err(err) => {
                remote.unsubscribe(show.id);
                return Err(err);
            }
        };

        info!(
            show = show.id.0,
            hide = hide.id.0,
            "subscribed to embedded view notifications"
        );

        self.show = Some(show);
        self.hide = Some(hide);
        self.remote = Some(remote);
        Ok(())
    }

    pub fn deactivate(&mut self) {
        let Some(remote) = self.remote.take() else {
            return;
        };

        for subscription in [self.show.take(), self.hide.take()].into_iter().flatten() {
            remote.unsubscribe(subscription.id);
        }

        info!("unsubscribed from embedded view notifications");
    }

    pub async fn next_event(&mut self) -> RemoteEvent {
        loop {
            if !self.is_active() {
                return std::future::pending().await;
            }

            let (slot, received) = tokio::select! {
                event = recv_from(&mut self.show) => (RemoteEvent::ShowEmbeddedView, event),
                event = recv_from(&mut self.hide) => (RemoteEvent::HideEmbeddedView, event),
            };

            match received {
                Some(event) => {
                    debug!(event = event.name(), "remote notification received");
                    return event;
                }
                None => {
                    warn!(event = slot.name(), "notification stream closed by remote");
                    self.release(slot);
                }
            }
        }
    }

    fn release(&mut self, slot: RemoteEvent) {
        let subscription = match slot {
            RemoteEvent::ShowEmbeddedView => self.show.take(),
            RemoteEvent::HideEmbeddedView => self.hide.take(),
        };

        if let (Some(subscription), Some(remote)) = (subscription, self.remote.as_ref()) {
            remote.unsubscribe(subscription.id);
        }
    }
}

impl Drop for EventSubscriptionManager {
    fn drop(&mut self) {
        self.deactivate();
    }
}

async fn recv_from(slot: &mut Option<Subscription>) -> Option<RemoteEvent> {
    match slot {
        Some(subscription) => subscription.events.recv().await,
        None => std::future::pending().await,
    }
}
