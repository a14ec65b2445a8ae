use std::fmt::{self, Write as _};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};
use snafu::ResultExt;

use super::error::{InvalidTimestampSnafu, SessionResult};
use super::ids::MessageId;

const NAIVE_TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Which side of the conversation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Authored by the local user.
    Outgoing,
    /// Authored by a remote participant.
    Incoming,
}

/// One renderable payload inside a message.
///
/// The session never looks inside an element; it only carries them between
/// producers and the renderer.
pub trait ContentElement: fmt::Debug + Send + Sync {
    /// Plain-text fallback for renderers that cannot draw the element natively.
    fn preview(&self) -> String;
}

pub type ContentRef = Arc<dyn ContentElement>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextElement {
    pub text: String,
}

impl TextElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn shared(text: impl Into<String>) -> ContentRef {
        Arc::new(Self::new(text))
    }
}

impl ContentElement for TextElement {
    fn preview(&self) -> String {
        self.text.clone()
    }
}

/// Field overrides applied by [`Message::copy_with`]. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub timestamp: Option<String>,
    pub author: Option<String>,
    pub content: Option<Vec<ContentRef>>,
    pub is_loading: Option<bool>,
    pub is_failed: Option<bool>,
    pub display_width_override: Option<Option<f32>>,
}

/// Immutable chat message. State changes produce a new value with the same id.
#[derive(Debug, Clone)]
pub struct Message {
    id: MessageId,
    direction: Direction,
    timestamp: String,
    author: String,
    content: Vec<ContentRef>,
    is_loading: bool,
    is_failed: bool,
    display_width_override: Option<f32>,
}

impl Message {
    /// Creates an outgoing message with a freshly generated id.
    pub fn outgoing(
        author: impl Into<String>,
        timestamp: impl Into<String>,
        content: Vec<ContentRef>,
    ) -> Self {
        Self::outgoing_with_id(MessageId::generate(), author, timestamp, content)
    }

    pub fn outgoing_with_id(
        id: MessageId,
        author: impl Into<String>,
        timestamp: impl Into<String>,
        content: Vec<ContentRef>,
    ) -> Self {
        Self::new(id, Direction::Outgoing, author, timestamp, content)
    }

    /// Creates an incoming message; remote ids are always caller supplied.
    pub fn incoming(
        id: MessageId,
        author: impl Into<String>,
        timestamp: impl Into<String>,
        content: Vec<ContentRef>,
    ) -> Self {
        Self::new(id, Direction::Incoming, author, timestamp, content)
    }

    fn new(
        id: MessageId,
        direction: Direction,
        author: impl Into<String>,
        timestamp: impl Into<String>,
        content: Vec<ContentRef>,
    ) -> Self {
        Self {
            id,
            direction,
            timestamp: timestamp.into(),
            author: author.into(),
            content,
            is_loading: false,
            is_failed: false,
            display_width_override: None,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn content(&self) -> &[ContentRef] {
        &self.content
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_failed(&self) -> bool {
        self.is_failed
    }

    pub fn display_width_override(&self) -> Option<f32> {
        self.display_width_override
    }

    /// Returns a copy with the patched fields replaced. The id never changes,
    /// and incoming messages can never be marked failed.
    pub fn copy_with(&self, patch: MessagePatch) -> Self {
        let mut next = self.clone();
        if let Some(timestamp) = patch.timestamp {
            next.timestamp = timestamp;
        }
        if let Some(author) = patch.author {
            next.author = author;
        }
        if let Some(content) = patch.content {
            next.content = content;
        }
        if let Some(is_loading) = patch.is_loading {
            next.is_loading = is_loading;
        }
        if let Some(is_failed) = patch.is_failed {
            next.is_failed = is_failed && next.is_outgoing();
        }
        if let Some(display_width_override) = patch.display_width_override {
            next.display_width_override = display_width_override;
        }
        next
    }

    pub fn with_status(&self, is_loading: bool, is_failed: bool) -> Self {
        self.copy_with(MessagePatch {
            is_loading: Some(is_loading),
            is_failed: Some(is_failed),
            ..MessagePatch::default()
        })
    }

    pub fn with_display_width(&self, width: Option<f32>) -> Self {
        self.copy_with(MessagePatch {
            display_width_override: Some(width),
            ..MessagePatch::default()
        })
    }

    /// Parses the timestamp on every call; nothing is cached on the message.
    pub fn parsed_timestamp(&self) -> SessionResult<DateTime<FixedOffset>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Parses an ISO-8601 timestamp. Values without an offset are read as UTC.
pub fn parse_timestamp(raw: &str) -> SessionResult<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    let rfc3339_error = match DateTime::parse_from_rfc3339(trimmed) {
        Ok(parsed) => return Ok(parsed),
        Err(error) => error,
    };

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc().fixed_offset())
        .ok_or(rfc3339_error)
        .context(InvalidTimestampSnafu {
            stage: "parse-timestamp",
            raw: raw.to_string(),
        })
}

/// Formats a parsed timestamp. Returns `None` for an unparseable timestamp or
/// an invalid chrono format string.
pub fn format_timestamp(raw: &str, format: &str) -> Option<String> {
    let parsed = parse_timestamp(raw).ok()?;
    let mut label = String::new();
    write!(label, "{}", parsed.format(format)).ok()?;
    Some(label)
}

/// True when both timestamps read the same year, month, day, hour and minute
/// on their own clocks. Unparseable input never matches.
pub fn same_calendar_minute(left: &str, right: &str) -> bool {
    match (parse_timestamp(left), parse_timestamp(right)) {
        (Ok(left), Ok(right)) => {
            let left = left.naive_local();
            let right = right.naive_local();
            left.date() == right.date()
                && left.hour() == right.hour()
                && left.minute() == right.minute()
        }
        (left, right) => {
            tracing::warn!(
                left_valid = left.is_ok(),
                right_valid = right.is_ok(),
                "cannot compare minute buckets of unparseable timestamps"
            );
            false
        }
    }
}

/// True when the two timestamps fall on different calendar days. Unparseable
/// input counts as a change so renderers still draw a separator.
pub fn calendar_day_changed(left: &str, right: &str) -> bool {
    match (parse_timestamp(left), parse_timestamp(right)) {
        (Ok(left), Ok(right)) => left.date_naive() != right.date_naive(),
        _ => true,
    }
}
