use crate::error::TransportError;
use crate::reconciler::SessionEvent;
use crate::services::BroadcastBus;
use chainwatch_core::TopicPattern;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keeps the session bound to the bus. Dropping the guard stops the forwarder,
/// which drops the underlying subscription and unbinds it.
#[derive(Debug)]
pub struct SubscriptionGuard {
    forwarder: JoinHandle<()>,
}

impl SubscriptionGuard {
    pub fn is_active(&self) -> bool {
        !self.forwarder.is_finished()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Subscribes to `pattern` and forwards every delivery, unfiltered, into the
/// session's inbound queue. If the bus ends the subscription, the session is
/// told with `SessionEvent::SubscriptionClosed`.
pub async fn bind(
    bus: &dyn BroadcastBus,
    pattern: &TopicPattern,
    inbound: mpsc::Sender<SessionEvent>,
) -> Result<SubscriptionGuard, TransportError> {
    let mut subscription = bus.subscribe(pattern).await?;
    info!(event = "bus_subscribed", pattern = %pattern);

    let bound_pattern = pattern.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(delivery) = subscription.recv().await {
            if inbound.send(SessionEvent::Notification(delivery)).await.is_err() {
                debug!(event = "bus_forwarder_stopped", pattern = %bound_pattern);
                return;
            }
        }
        warn!(event = "bus_subscription_lost", pattern = %bound_pattern);
        let _ = inbound.send(SessionEvent::SubscriptionClosed).await;
    });

    Ok(SubscriptionGuard { forwarder })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBus;
    use chainwatch_core::ChainNotification;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn forwards_every_matching_delivery() {
        let bus = InMemoryBus::default();
        let (tx, mut rx) = mpsc::channel(8);
        let guard = bind(&bus, &TopicPattern::all_chains(), tx)
            .await
            .expect("bind");
        assert!(guard.is_active());

        bus.publish(&ChainNotification::TopologyChanged {
            chain_id: "C5".to_string(),
        });
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event in time")
            .expect("event");
        let SessionEvent::Notification(delivery) = event else {
            panic!("expected notification");
        };
        assert_eq!(delivery.topic, "chain_intel:C5");
    }

    #[tokio::test]
    async fn bus_loss_is_reported_once() {
        let bus = InMemoryBus::default();
        let (tx, mut rx) = mpsc::channel(8);
        let _guard = bind(&bus, &TopicPattern::all_chains(), tx)
            .await
            .expect("bind");

        bus.disconnect_subscribers();
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event in time")
            .expect("event");
        assert_eq!(event, SessionEvent::SubscriptionClosed);
    }

    #[tokio::test]
    async fn dropping_guard_unbinds() {
        let bus = InMemoryBus::default();
        let (tx, mut rx) = mpsc::channel(8);
        let guard = bind(&bus, &TopicPattern::all_chains(), tx)
            .await
            .expect("bind");
        drop(guard);

        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish(&ChainNotification::TopologyChanged {
            chain_id: "C5".to_string(),
        });
        let received = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(received, Ok(None)));
    }
}
