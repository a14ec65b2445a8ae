use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::ids::{GroupId, MessageId};
use super::message::Message;

/// Caller-supplied send operation. Resolving to `None` marks the send as failed.
pub type SendCallback = Arc<dyn Fn(Message) -> BoxFuture<'static, Option<Message>> + Send + Sync>;

/// Wraps an async closure as a [`SendCallback`].
pub fn send_callback<F, Fut>(send: F) -> SendCallback
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Message>> + Send + 'static,
{
    Arc::new(move |message| send(message).boxed())
}

/// Retry record for one failed outgoing message.
///
/// `group` is a lookup hint only; failure repair revalidates it and the
/// session always trusts the group list over this field.
#[derive(Clone)]
pub struct FailedMessageEntry {
    message_id: MessageId,
    pub(crate) group: GroupId,
    send: SendCallback,
}

impl FailedMessageEntry {
    pub(crate) fn new(message_id: MessageId, group: GroupId, send: SendCallback) -> Self {
        Self {
            message_id,
            group,
            send,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub(crate) fn send_callback(&self) -> SendCallback {
        Arc::clone(&self.send)
    }
}

impl fmt::Debug for FailedMessageEntry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FailedMessageEntry")
            .field("message_id", &self.message_id)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Failed entries in the order they were first recorded. Keys are unique.
#[derive(Debug, Default)]
pub(crate) struct FailedEntries {
    entries: Vec<FailedMessageEntry>,
}

impl FailedEntries {
    pub(crate) fn get(&self, id: &MessageId) -> Option<&FailedMessageEntry> {
        self.entries.iter().find(|entry| &entry.message_id == id)
    }

    /// Inserts or replaces the record for the entry's id. A replaced record
    /// keeps its original position.
    pub(crate) fn record(&mut self, entry: FailedMessageEntry) {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.message_id == entry.message_id)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub(crate) fn remove(&mut self, id: &MessageId) -> Option<FailedMessageEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| &entry.message_id == id)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn set_group(&mut self, id: &MessageId, group: GroupId) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| &entry.message_id == id) {
            entry.group = group;
        }
    }

    pub(crate) fn ids(&self) -> Vec<MessageId> {
        self.entries
            .iter()
            .map(|entry| entry.message_id.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never_sends() -> SendCallback {
        send_callback(|_message| async { None })
    }

    #[test]
    fn record_replaces_in_place_without_duplicates() {
        let mut entries = FailedEntries::default();
        entries.record(FailedMessageEntry::new("a".into(), GroupId::new(1), never_sends()));
        entries.record(FailedMessageEntry::new("b".into(), GroupId::new(2), never_sends()));
        entries.record(FailedMessageEntry::new("a".into(), GroupId::new(5), never_sends()));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries.ids(), vec![MessageId::from("a"), MessageId::from("b")]);
        assert_eq!(
            entries.get(&"a".into()).map(FailedMessageEntry::group),
            Some(GroupId::new(5))
        );
    }

    #[test]
    fn remove_and_set_group_ignore_unknown_ids() {
        let mut entries = FailedEntries::default();
        entries.record(FailedMessageEntry::new("a".into(), GroupId::new(1), never_sends()));

        entries.set_group(&"missing".into(), GroupId::new(9));
        assert!(entries.remove(&"missing".into()).is_none());

        entries.set_group(&"a".into(), GroupId::new(4));
        assert_eq!(
            entries.remove(&"a".into()).map(|entry| entry.group()),
            Some(GroupId::new(4))
        );
        assert!(entries.get(&"a".into()).is_none());
    }

    #[tokio::test]
    async fn stored_callback_is_the_original() {
        let entry = FailedMessageEntry::new(
            "a".into(),
            GroupId::new(1),
            send_callback(|message: Message| async move { Some(message) }),
        );
        let message = Message::outgoing("me", "2024-05-01T10:00:00Z", Vec::new());
        let echoed = (entry.send_callback())(message.clone()).await;
        assert_eq!(echoed.map(|echoed| echoed.id().clone()), Some(message.id().clone()));
    }
}
