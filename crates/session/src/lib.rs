#![deny(unsafe_code)]

//! In-memory state for one chat conversation: message grouping, optimistic
//! sends with retry bookkeeping, and the event streams a renderer listens to.

pub mod error;
/// Dispatch results and the broadcast plumbing behind the session streams.
pub mod events;
pub mod failed;
pub mod group;
pub mod ids;
/// Message values, content elements and timestamp helpers.
pub mod message;
/// Scroll-position seam used by `ChatSession::is_at_bottom`.
pub mod scroll;
pub mod session;
/// Settings file loading and persistence.
pub mod settings;

pub use error::{DispatchFailure, SessionError, SessionResult};
pub use events::DispatchResult;
pub use failed::{FailedMessageEntry, SendCallback, send_callback};
pub use group::MessageGroup;
pub use ids::{GroupId, MessageId};
pub use message::{
    ContentElement, ContentRef, Direction, Message, MessagePatch, TextElement,
    calendar_day_changed, format_timestamp, parse_timestamp, same_calendar_minute,
};
pub use scroll::{ScrollPosition, ScrollTracker};
pub use session::ChatSession;
pub use settings::{SessionSettings, SettingsStore};
