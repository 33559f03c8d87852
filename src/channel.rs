use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::model::{SearchEvent, SessionId};

/// Handle for receiving the events of one session
pub struct Subscription {
    pub session_id: SessionId,
    receiver: broadcast::Receiver<SearchEvent>,
}

impl Subscription {
    /// Next event, or `None` once the session's channel is closed. Events
    /// missed while lagging are skipped.
    pub async fn recv(&mut self) -> Option<SearchEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Subscriber of session {} lagged, {} events dropped", self.session_id, missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Per-session pub/sub. No replay: a subscriber only sees events published
/// after it subscribed.
#[derive(Debug, Clone)]
pub struct ResultChannel {
    channels: Arc<RwLock<HashMap<SessionId, broadcast::Sender<SearchEvent>>>>,
    buffer_size: usize,
}

impl ResultChannel {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Create the channel for a session and subscribe to it in one step.
    pub async fn open(&self, session_id: SessionId) -> Subscription {
        let mut channels = self.channels.write().await;
        let receiver = channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .subscribe();
        debug!("Opened result channel for session {}", session_id);
        Subscription {
            session_id,
            receiver,
        }
    }

    pub async fn subscribe(&self, session_id: SessionId) -> Option<Subscription> {
        let channels = self.channels.read().await;
        channels.get(&session_id).map(|sender| Subscription {
            session_id,
            receiver: sender.subscribe(),
        })
    }

    /// Fire-and-forget delivery. Returns the number of subscribers reached.
    pub async fn publish(&self, session_id: SessionId, event: SearchEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&session_id) {
            Some(sender) => match sender.send(event) {
                Ok(count) => count,
                Err(_) => {
                    debug!("No active subscribers for session {}", session_id);
                    0
                }
            },
            None => {
                debug!("Dropped event for unknown session {}", session_id);
                0
            }
        }
    }

    /// Drop the session's sender; subscribers drain what is buffered and then end.
    pub async fn close(&self, session_id: SessionId) {
        if self.channels.write().await.remove(&session_id).is_some() {
            info!("Closed result channel for session {}", session_id);
        }
    }
}

impl Default for ResultChannel {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn completed(total: usize) -> SearchEvent {
        SearchEvent::SessionCompleted { total }
    }

    #[tokio::test]
    async fn late_subscriber_sees_no_past_events() {
        let channel = ResultChannel::default();
        let id = Uuid::new_v4();
        let mut early = channel.open(id).await;

        channel.publish(id, completed(1)).await;
        let mut late = channel.subscribe(id).await.unwrap();
        channel.publish(id, completed(2)).await;
        channel.close(id).await;

        assert_eq!(early.recv().await, Some(completed(1)));
        assert_eq!(early.recv().await, Some(completed(2)));
        assert_eq!(early.recv().await, None);
        assert_eq!(late.recv().await, Some(completed(2)));
        assert_eq!(late.recv().await, None);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let channel = ResultChannel::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut sub_a = channel.open(a).await;
        let _sub_b = channel.open(b).await;

        assert_eq!(channel.publish(b, completed(7)).await, 1);
        channel.publish(a, completed(3)).await;
        assert_eq!(sub_a.recv().await, Some(completed(3)));
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_block_publishing() {
        let channel = ResultChannel::new(4);
        let id = Uuid::new_v4();
        drop(channel.open(id).await);

        for total in 0..16 {
            assert_eq!(channel.publish(id, completed(total)).await, 0);
        }
        assert_eq!(channel.publish(Uuid::new_v4(), completed(0)).await, 0);

        // a new subscriber is reached again
        let mut again = channel.subscribe(id).await.unwrap();
        assert_eq!(channel.publish(id, completed(99)).await, 1);
        assert_eq!(again.recv().await, Some(completed(99)));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_buffered_events() {
        let channel = ResultChannel::new(2);
        let id = Uuid::new_v4();
        let mut sub = channel.open(id).await;
        for total in 0..5 {
            channel.publish(id, completed(total)).await;
        }
        channel.close(id).await;

        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }
        assert_eq!(events, vec![completed(3), completed(4)]);
    }
}
