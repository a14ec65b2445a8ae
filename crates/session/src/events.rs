use tokio::sync::{broadcast, watch};

use super::error::DispatchFailure;
use super::message::Message;

/// Outcome of one dispatch or retry attempt.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub message: Message,
    pub success: bool,
    pub error: Option<DispatchFailure>,
}

impl DispatchResult {
    pub fn succeeded(message: Message) -> Self {
        Self {
            message,
            success: true,
            error: None,
        }
    }

    pub fn failed(message: Message, error: DispatchFailure) -> Self {
        Self {
            message,
            success: false,
            error: Some(error),
        }
    }
}

/// Fan-out publishers for the session's streams.
///
/// Broadcast channels never replay: a receiver only sees events sent after it
/// subscribed. Dropping the senders on dispose closes every receiver.
pub(crate) struct EventHub {
    dispatch_results: Option<broadcast::Sender<DispatchResult>>,
    received_messages: Option<broadcast::Sender<Message>>,
    changes: watch::Sender<u64>,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (dispatch_results, _) = broadcast::channel(capacity);
        let (received_messages, _) = broadcast::channel(capacity);
        let (changes, _) = watch::channel(0);
        Self {
            dispatch_results: Some(dispatch_results),
            received_messages: Some(received_messages),
            changes,
        }
    }

    /// Returns a receiver, or `None` once the hub has been closed.
    pub(crate) fn subscribe_dispatch_results(&self) -> Option<broadcast::Receiver<DispatchResult>> {
        self.dispatch_results.as_ref().map(broadcast::Sender::subscribe)
    }

    pub(crate) fn subscribe_received_messages(&self) -> Option<broadcast::Receiver<Message>> {
        self.received_messages
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    pub(crate) fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub(crate) fn publish_dispatch_result(&self, result: DispatchResult) {
        if let Some(sender) = &self.dispatch_results {
            // Sending only fails when nobody is listening, which is fine.
            let _ = sender.send(result);
        }
    }

    pub(crate) fn publish_received_message(&self, message: Message) {
        if let Some(sender) = &self.received_messages {
            let _ = sender.send(message);
        }
    }

    /// Bumps the change revision; watchers wake with the latest value.
    pub(crate) fn notify_changed(&self) {
        self.changes.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    pub(crate) fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Drops both broadcast senders. Returns false when already closed.
    pub(crate) fn close(&mut self) -> bool {
        let was_open = self.dispatch_results.is_some() || self.received_messages.is_some();
        self.dispatch_results = None;
        self.received_messages = None;
        was_open
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    use super::*;

    fn message() -> Message {
        Message::outgoing("me", "2024-05-01T10:00:00Z", Vec::new())
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let hub = EventHub::new(8);
        let mut early = hub.subscribe_dispatch_results();
        hub.publish_dispatch_result(DispatchResult::succeeded(message()));
        let mut late = hub.subscribe_dispatch_results();

        assert!(early.as_mut().map(|rx| rx.try_recv().is_ok()).unwrap_or(false));
        assert!(matches!(
            late.as_mut().map(|rx| rx.try_recv()),
            Some(Err(TryRecvError::Empty))
        ));
    }

    #[test]
    fn every_subscriber_gets_each_event() {
        let hub = EventHub::new(8);
        let mut first = hub.subscribe_received_messages();
        let mut second = hub.subscribe_received_messages();
        hub.publish_received_message(message());

        for receiver in [first.as_mut(), second.as_mut()] {
            assert!(receiver.map(|rx| rx.try_recv().is_ok()).unwrap_or(false));
        }
    }

    #[tokio::test]
    async fn close_ends_streams_once() {
        let mut hub = EventHub::new(8);
        let mut results = hub.subscribe_dispatch_results();

        assert!(hub.close());
        assert!(!hub.close());
        assert!(hub.subscribe_dispatch_results().is_none());

        let received = match results.as_mut() {
            Some(rx) => rx.recv().await,
            None => panic!("subscribed before close"),
        };
        assert!(matches!(received, Err(RecvError::Closed)));
    }

    #[test]
    fn change_revision_increments() {
        let hub = EventHub::new(1);
        let watcher = hub.subscribe_changes();
        hub.notify_changed();
        hub.notify_changed();
        assert_eq!(hub.revision(), 2);
        assert_eq!(*watcher.borrow(), 2);
    }
}
