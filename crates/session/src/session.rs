use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};

use super::error::DispatchFailure;
use super::events::{DispatchResult, EventHub};
use super::failed::{FailedEntries, FailedMessageEntry, SendCallback};
use super::group::MessageGroup;
use super::ids::{GroupId, MessageId};
use super::message::{Message, calendar_day_changed, format_timestamp};
use super::scroll::ScrollPosition;
use super::settings::SessionSettings;

/// Where an optimistic message was placed when its dispatch started.
#[derive(Debug, Clone, Copy)]
struct Placement {
    group: GroupId,
    index: usize,
}

struct SessionState {
    groups: Vec<MessageGroup>,
    failed: FailedEntries,
    collapsed: bool,
    disposed: bool,
    next_group_id: u64,
    events: EventHub,
    scroll: Option<Arc<dyn ScrollPosition>>,
}

struct SessionInner {
    state: Mutex<SessionState>,
    settings: SessionSettings,
}

/// Authoritative in-memory model of one conversation.
///
/// Cloning yields another handle to the same session. The state lock is never
/// held across the send callback, so dispatches for different messages can
/// interleave; two operations on the same message id must be serialized by
/// the caller.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::with_settings(SessionSettings::default())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        let settings = settings.normalized();
        let state = SessionState {
            groups: Vec::new(),
            failed: FailedEntries::default(),
            collapsed: false,
            disposed: false,
            next_group_id: 1,
            events: EventHub::new(settings.event_capacity),
            scroll: None,
        };
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(state),
                settings,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Replaces every group and failed record with `messages`, inserted in
    /// timestamp order. Unparseable timestamps sort first.
    pub fn set_messages(&self, mut messages: Vec<Message>) {
        let mut state = self.state();
        if state.disposed {
            tracing::debug!("ignoring set_messages on disposed session");
            return;
        }

        messages.sort_by_key(|message| message.parsed_timestamp().ok());
        state.groups.clear();
        state.failed.clear();
        let count = messages.len();
        for message in messages {
            state.add(message);
        }
        tracing::debug!(count, groups = state.groups.len(), "replaced session messages");
        state.events.notify_changed();
    }

    /// Prepends older history. Each message is matched against the first
    /// group, in the order given. Failure repair does not run here.
    pub fn append_messages(&self, messages: Vec<Message>) {
        let mut state = self.state();
        if state.disposed {
            tracing::debug!("ignoring append_messages on disposed session");
            return;
        }

        let count = messages.len();
        for message in messages {
            state.prepend(message);
        }
        tracing::debug!(count, groups = state.groups.len(), "prepended history");
        state.events.notify_changed();
    }

    /// Inserts a message at the tail and returns the group now holding it.
    /// Returns `None` once the session is disposed.
    pub fn add_message(&self, message: Message) -> Option<GroupId> {
        let mut state = self.state();
        if state.disposed {
            tracing::debug!(message_id = %message.id(), "ignoring add_message on disposed session");
            return None;
        }

        let group = state.add(message);
        state.events.notify_changed();
        Some(group)
    }

    /// Inserts a message that arrived from a remote participant and
    /// announces it on the received-message stream.
    pub fn receive_message(&self, message: Message) -> Option<GroupId> {
        let mut state = self.state();
        if state.disposed {
            tracing::debug!(message_id = %message.id(), "ignoring received message on disposed session");
            return None;
        }

        let group = state.add(message.clone());
        state.events.notify_changed();
        state.events.publish_received_message(message);
        Some(group)
    }

    /// Replaces the message with the same id wherever it sits and re-sorts
    /// that group. A message that is no longer failed loses its retry record.
    pub fn update_message(&self, message: Message) -> bool {
        let mut state = self.state();
        if state.disposed {
            return false;
        }

        let Some((group_index, message_index)) = state.locate(message.id(), |_| true) else {
            tracing::debug!(message_id = %message.id(), "update skipped, message not found");
            return false;
        };

        if !message.is_failed() {
            state.failed.remove(message.id());
        }
        let group = &mut state.groups[group_index];
        group.messages[message_index] = message;
        group.sort_messages();
        state.events.notify_changed();
        true
    }

    /// Sends `message` through `send`, showing it optimistically while the
    /// callback runs.
    ///
    /// If the session is disposed while the callback is in flight, the result
    /// is still computed and returned but nothing is published or changed.
    pub async fn dispatch_message(&self, message: Message, send: SendCallback) -> DispatchResult {
        let optimistic = message.with_status(true, false);
        let placement = {
            let mut state = self.state();
            if state.disposed {
                tracing::debug!(message_id = %message.id(), "dispatch refused on disposed session");
                return DispatchResult::failed(message, DispatchFailure::Disposed);
            }

            let group = state.add(optimistic);
            let index = state
                .group(group)
                .and_then(|group| {
                    group
                        .messages
                        .iter()
                        .rposition(|placed| placed.id() == message.id() && !placed.is_failed())
                })
                .unwrap_or_default();
            state.events.notify_changed();
            Placement { group, index }
        };

        tracing::debug!(message_id = %message.id(), group_id = %placement.group, "dispatching message");
        let outcome = send(message.clone()).await;

        let mut state = self.state();
        match outcome {
            Some(confirmed) => {
                let result = DispatchResult::succeeded(confirmed.clone());
                if state.disposed {
                    tracing::debug!(message_id = %message.id(), "dispatch finished after dispose");
                    return result;
                }

                state.settle_success(placement, message.id(), confirmed.clone());
                state.events.notify_changed();
                tracing::info!(message_id = %confirmed.id(), "message dispatched");
                state.events.publish_dispatch_result(result.clone());
                if !confirmed.is_outgoing() {
                    state.events.publish_received_message(confirmed);
                }
                result
            }
            None => {
                let failed_message = message.with_status(false, true);
                let result = DispatchResult::failed(
                    failed_message.clone(),
                    DispatchFailure::NoMessageReturned,
                );
                if state.disposed {
                    tracing::debug!(message_id = %message.id(), "dispatch failed after dispose");
                    return result;
                }

                state.settle_failure(placement, failed_message, send);
                state.events.notify_changed();
                tracing::info!(message_id = %message.id(), "message dispatch failed");
                state.events.publish_dispatch_result(result.clone());
                result
            }
        }
    }

    /// Re-sends a failed message with the callback from its first dispatch.
    pub async fn retry_message(&self, message: &Message) -> DispatchResult {
        let (pending, send) = {
            let mut state = self.state();
            if state.disposed {
                return DispatchResult::failed(message.clone(), DispatchFailure::Disposed);
            }

            let Some(entry) = state.failed.get(message.id()).cloned() else {
                tracing::warn!(message_id = %message.id(), "retry requested without a failed record");
                let result =
                    DispatchResult::failed(message.clone(), DispatchFailure::RetryWithoutRecord);
                state.events.publish_dispatch_result(result.clone());
                return result;
            };

            let Some((group_index, message_index)) =
                state.locate_failed(entry.group(), message.id())
            else {
                tracing::warn!(
                    message_id = %message.id(),
                    group_id = %entry.group(),
                    "failed record points at an empty group"
                );
                let result =
                    DispatchResult::failed(message.clone(), DispatchFailure::EmptyFailedGroup);
                state.events.publish_dispatch_result(result.clone());
                return result;
            };

            let placed = state.take(group_index, message_index);
            state.events.notify_changed();
            (placed.with_status(false, false), entry.send_callback())
        };

        tracing::debug!(message_id = %pending.id(), "retrying failed message");
        let result = self.dispatch_message(pending, send).await;
        if result.success {
            let mut state = self.state();
            if !state.disposed {
                state.failed.remove(message.id());
            }
        }
        result
    }

    /// Removes every copy of the message from every group.
    pub fn remove_message_everywhere(&self, id: &MessageId) -> bool {
        let mut state = self.state();
        if state.disposed {
            return false;
        }

        let mut removed = 0usize;
        let mut group_index = state.groups.len();
        while group_index > 0 {
            group_index -= 1;
            let group = &mut state.groups[group_index];
            let before = group.messages.len();
            group.messages.retain(|message| message.id() != id);
            removed += before - group.messages.len();
            if group.is_empty() {
                state.groups.remove(group_index);
            }
        }

        let had_record = state.failed.remove(id).is_some();
        tracing::debug!(message_id = %id, removed, had_record, "removed message everywhere");
        state.events.notify_changed();
        removed > 0 || had_record
    }

    /// Removes the message from a group the caller already holds. The group is
    /// deleted if this was its last message.
    pub fn remove_message_from_group(&self, group: GroupId, id: &MessageId) -> bool {
        let mut state = self.state();
        if state.disposed {
            return false;
        }

        let Some(group_index) = state.group_index(group) else {
            tracing::debug!(group_id = %group, message_id = %id, "remove skipped, group is gone");
            return false;
        };
        let Some(message_index) = state.groups[group_index].position_of(id) else {
            tracing::debug!(group_id = %group, message_id = %id, "remove skipped, message not in group");
            return false;
        };

        state.take(group_index, message_index);
        state.failed.remove(id);
        state.events.notify_changed();
        true
    }

    /// Snapshot of the current groups, oldest first.
    pub fn groups(&self) -> Vec<MessageGroup> {
        self.state().groups.clone()
    }

    pub fn group(&self, id: GroupId) -> Option<MessageGroup> {
        self.state().group(id).cloned()
    }

    pub fn group_count(&self) -> usize {
        self.state().groups.len()
    }

    pub fn message_count(&self) -> usize {
        self.state().groups.iter().map(MessageGroup::len).sum()
    }

    pub fn contains_message_id(&self, id: &MessageId) -> bool {
        self.state().groups.iter().any(|group| group.contains(id))
    }

    pub fn find_message(&self, id: &MessageId) -> Option<Message> {
        let state = self.state();
        state
            .locate(id, |_| true)
            .map(|(group_index, message_index)| {
                state.groups[group_index].messages[message_index].clone()
            })
    }

    pub fn failed_entry(&self, id: &MessageId) -> Option<FailedMessageEntry> {
        self.state().failed.get(id).cloned()
    }

    /// Ids with a retry record, in the order the records were first made.
    pub fn failed_message_ids(&self) -> Vec<MessageId> {
        self.state().failed.ids()
    }

    pub fn is_collapsed(&self) -> bool {
        self.state().collapsed
    }

    pub fn set_collapsed(&self, collapsed: bool) {
        let mut state = self.state();
        if state.disposed || state.collapsed == collapsed {
            return;
        }
        state.collapsed = collapsed;
        state.events.notify_changed();
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    /// True when the two messages fall on different calendar days.
    pub fn is_date_changed(first: &Message, second: &Message) -> bool {
        calendar_day_changed(first.timestamp(), second.timestamp())
    }

    /// Whether a renderer should draw a date separator before `next`.
    pub fn date_separator_needed(previous: Option<&Message>, next: &Message) -> bool {
        previous.is_none_or(|previous| Self::is_date_changed(previous, next))
    }

    /// Formats the message's calendar day with the configured date format.
    pub fn date_label(&self, message: &Message) -> Option<String> {
        format_timestamp(message.timestamp(), &self.inner.settings.date_label_format)
    }

    /// Formats a group's anchor time with the configured time format.
    pub fn time_label(&self, group: &MessageGroup) -> Option<String> {
        group.time_label(&self.inner.settings.time_label_format)
    }

    pub fn attach_scroll(&self, scroll: Arc<dyn ScrollPosition>) {
        let mut state = self.state();
        if !state.disposed {
            state.scroll = Some(scroll);
        }
    }

    pub fn detach_scroll(&self) {
        self.state().scroll = None;
    }

    /// Asks the scroll collaborator whether the viewport sits within
    /// `threshold` pixels of the end. Without a collaborator there is nothing
    /// to scroll, so the answer is yes.
    pub fn is_at_bottom(&self, threshold: f32) -> bool {
        let scroll = self.state().scroll.clone();
        scroll.is_none_or(|scroll| scroll.is_within_bottom(threshold))
    }

    pub fn is_near_bottom(&self) -> bool {
        self.is_at_bottom(self.inner.settings.at_bottom_threshold_px)
    }

    /// Returns `None` once the session is disposed.
    pub fn subscribe_dispatch_results(&self) -> Option<broadcast::Receiver<DispatchResult>> {
        self.state().events.subscribe_dispatch_results()
    }

    pub fn subscribe_received_messages(&self) -> Option<broadcast::Receiver<Message>> {
        self.state().events.subscribe_received_messages()
    }

    /// Revision counter bumped on every visible change.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.state().events.subscribe_changes()
    }

    pub fn revision(&self) -> u64 {
        self.state().events.revision()
    }

    /// Makes the session inert: closes both streams, clears all state and
    /// suppresses further notifications. Calling it again does nothing.
    pub fn dispose(&self) {
        let mut state = self.state();
        if state.disposed {
            return;
        }

        let dropped_records = state.failed.len();
        state.disposed = true;
        state.events.close();
        state.groups.clear();
        state.failed.clear();
        state.scroll = None;
        tracing::debug!(dropped_records, "chat session disposed");
    }
}

impl SessionState {
    fn group_index(&self, id: GroupId) -> Option<usize> {
        self.groups.iter().position(|group| group.id() == id)
    }

    fn group(&self, id: GroupId) -> Option<&MessageGroup> {
        self.groups.iter().find(|group| group.id() == id)
    }

    fn push_group(&mut self, first: Message) -> GroupId {
        let group = self.new_group(first);
        let id = group.id();
        self.groups.push(group);
        id
    }

    fn new_group(&mut self, first: Message) -> MessageGroup {
        let id = GroupId::new(self.next_group_id);
        self.next_group_id += 1;
        MessageGroup::new(id, first)
    }

    /// Grouping plus failure repair. Returns the group holding the message
    /// after repair.
    fn add(&mut self, message: Message) -> GroupId {
        let id = message.id().clone();
        let inserted = match self.groups.last_mut() {
            Some(last) if last.accepts(&message) => {
                last.messages.push(message);
                last.id()
            }
            _ => self.push_group(message),
        };

        self.repair_failed();

        self.groups
            .iter()
            .rev()
            .find(|group| group.contains(&id))
            .map(MessageGroup::id)
            .unwrap_or(inserted)
    }

    fn prepend(&mut self, message: Message) {
        match self.groups.first_mut() {
            Some(first) if first.accepts(&message) => first.messages.insert(0, message),
            _ => {
                let group = self.new_group(message);
                self.groups.insert(0, group);
            }
        }
    }

    /// Moves every failed message to the tail of the last group of its
    /// direction, or into a fresh trailing group.
    fn repair_failed(&mut self) {
        for id in self.failed.ids() {
            let Some(recorded) = self.failed.get(&id).map(FailedMessageEntry::group) else {
                continue;
            };
            // Not placed right now, e.g. while its retry is in flight.
            let Some((group_index, message_index)) = self.locate_failed(recorded, &id) else {
                continue;
            };

            let message = self.take(group_index, message_index);
            let target = match self.groups.last_mut() {
                Some(last) if last.direction() == message.direction() => {
                    last.messages.push(message);
                    last.id()
                }
                _ => self.push_group(message),
            };
            if target != recorded {
                tracing::debug!(message_id = %id, from = %recorded, to = %target, "relocated failed message");
            }
            self.failed.set_group(&id, target);
        }
    }

    /// Finds the first message matching `id` and `filter`, newest group first.
    fn locate(&self, id: &MessageId, filter: impl Fn(&Message) -> bool) -> Option<(usize, usize)> {
        self.groups
            .iter()
            .enumerate()
            .rev()
            .find_map(|(group_index, group)| {
                group
                    .messages
                    .iter()
                    .position(|message| message.id() == id && filter(message))
                    .map(|message_index| (group_index, message_index))
            })
    }

    /// Finds a failed message, trying the recorded group before scanning.
    fn locate_failed(&self, recorded: GroupId, id: &MessageId) -> Option<(usize, usize)> {
        let in_recorded = self.group_index(recorded).and_then(|group_index| {
            self.groups[group_index]
                .messages
                .iter()
                .position(|message| message.id() == id && message.is_failed())
                .map(|message_index| (group_index, message_index))
        });
        in_recorded.or_else(|| self.locate(id, Message::is_failed))
    }

    /// Resolves a dispatch placement, falling back to an id lookup if the
    /// captured position no longer holds the in-flight message.
    fn locate_in_flight(&self, placement: Placement, id: &MessageId) -> Option<(usize, usize)> {
        let in_flight = |message: &Message| message.id() == id && !message.is_failed();
        if let Some(group_index) = self.group_index(placement.group) {
            let messages = &self.groups[group_index].messages;
            if messages.get(placement.index).is_some_and(in_flight) {
                return Some((group_index, placement.index));
            }
            if let Some(message_index) = messages.iter().position(in_flight) {
                tracing::warn!(
                    message_id = %id,
                    group_id = %placement.group,
                    captured = placement.index,
                    actual = message_index,
                    "in-flight message moved within its group"
                );
                return Some((group_index, message_index));
            }
        }

        let found = self.locate(id, |message| !message.is_failed());
        if found.is_some() {
            tracing::warn!(message_id = %id, group_id = %placement.group, "in-flight message left its group");
        }
        found
    }

    /// Removes one message by position and drops the group if it empties.
    fn take(&mut self, group_index: usize, message_index: usize) -> Message {
        let group = &mut self.groups[group_index];
        let message = group.messages.remove(message_index);
        if group.is_empty() {
            let group = self.groups.remove(group_index);
            tracing::debug!(group_id = %group.id(), "removed empty group");
        }
        message
    }

    fn settle_success(&mut self, placement: Placement, id: &MessageId, confirmed: Message) {
        let Some((group_index, message_index)) = self.locate_in_flight(placement, id) else {
            tracing::warn!(message_id = %id, "confirmed message has no placeholder left to replace");
            return;
        };

        let group = &mut self.groups[group_index];
        group.messages[message_index] = confirmed;
        group.sort_messages();
    }

    fn settle_failure(&mut self, placement: Placement, failed: Message, send: SendCallback) {
        let id = failed.id().clone();
        match self.locate_in_flight(placement, &id) {
            Some((group_index, message_index)) => {
                self.take(group_index, message_index);
            }
            None => {
                tracing::warn!(message_id = %id, "failed message has no placeholder left to remove");
            }
        }
        self.failed.remove(&id);

        // Best guess at where repair will put it; the next repair pass corrects it.
        let recorded = self
            .groups
            .last()
            .filter(|last| last.direction() == failed.direction())
            .map(MessageGroup::id)
            .unwrap_or(placement.group);
        self.failed
            .record(FailedMessageEntry::new(id, recorded, send));
        self.add(failed);
    }
}
