use super::ids::{GroupId, MessageId};
use super::message::{Direction, Message, format_timestamp, same_calendar_minute};

/// A run of same-direction messages clustered into one visual block.
///
/// The group does not police its own membership; the session decides what
/// joins it. `anchor_timestamp` is fixed at creation and never recomputed.
#[derive(Debug, Clone)]
pub struct MessageGroup {
    id: GroupId,
    author: String,
    direction: Direction,
    anchor_timestamp: String,
    pub(crate) messages: Vec<Message>,
}

impl MessageGroup {
    pub(crate) fn new(id: GroupId, first: Message) -> Self {
        Self {
            id,
            author: first.author().to_string(),
            direction: first.direction(),
            anchor_timestamp: first.timestamp().to_string(),
            messages: vec![first],
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }

    pub fn anchor_timestamp(&self) -> &str {
        &self.anchor_timestamp
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position_of(id).is_some()
    }

    pub fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|message| message.id() == id)
    }

    /// Formats the anchor timestamp with a chrono format string, e.g. `%H:%M`.
    pub fn time_label(&self, format: &str) -> Option<String> {
        format_timestamp(&self.anchor_timestamp, format)
    }

    /// True when `message` shares this group's direction and anchor minute.
    pub(crate) fn accepts(&self, message: &Message) -> bool {
        self.direction == message.direction()
            && same_calendar_minute(&self.anchor_timestamp, message.timestamp())
    }

    /// Orders messages by timestamp, keeping failed outgoing messages behind
    /// every other message. Equal keys keep their insertion order.
    pub fn sort_messages(&mut self) {
        // A flat key keeps the order total even if a send result of the other
        // direction landed in this group.
        self.messages.sort_by_key(|message| {
            (
                message.is_outgoing() && message.is_failed(),
                message.parsed_timestamp().ok(),
            )
        });
    }
}
