//! Ordered message set of one open chat.
//!
//! Entries are kept in `sent_at` order by positional insertion; equal
//! timestamps keep arrival order. Remote events are folded in through one
//! merge function per event kind, joined on the message id only, and every
//! merge is idempotent. Ids removed by a confirmed delete are tombstoned so a
//! late echo cannot bring them back.

use std::collections::HashSet;

use parley_shared::{DeliveryState, Message, MessageId};

use crate::last_message::latest_persisted;

/// Outcome of folding one event into the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// A new entry was placed in the view.
    Inserted,
    /// An existing entry (usually the local optimistic one) was confirmed.
    Confirmed,
    Updated,
    Removed,
    /// Nothing changed.
    Ignored,
}

fn order_key(message: &Message) -> i64 {
    message.sent_at.unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    tombstones: HashSet<MessageId>,
}

impl Timeline {
    /// Build from a backend snapshot, sorted by `sent_at` (stable).
    pub fn from_snapshot(mut messages: Vec<Message>) -> Self {
        messages.sort_by_key(order_key);
        let mut timeline = Self::default();
        for message in messages {
            if timeline.position(&message.id).is_none() {
                timeline.messages.push(message);
            }
        }
        timeline
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Ids the backend is known to hold right now.
    pub fn persisted_ids(&self) -> HashSet<MessageId> {
        self.messages
            .iter()
            .filter(|m| m.is_persisted())
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    pub fn is_tombstoned(&self, id: &MessageId) -> bool {
        self.tombstones.contains(id)
    }

    pub fn latest_persisted(&self) -> Option<&Message> {
        latest_persisted(&self.messages)
    }

    fn insert_ordered(&mut self, message: Message) {
        let at = order_key(&message);
        let pos = self.messages.partition_point(|m| order_key(m) <= at);
        self.messages.insert(pos, message);
    }

    /// Show a local optimistic entry.
    pub fn push_local(&mut self, message: Message) {
        match self.get_mut(&message.id) {
            Some(existing) => *existing = message,
            None => self.insert_ordered(message),
        }
    }

    /// Drop an entry that never reached the backend. No tombstone.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        self.position(id).map(|pos| self.messages.remove(pos))
    }

    /// Drop an entry after a confirmed delete and tombstone its id.
    pub fn forget(&mut self, id: &MessageId) -> Option<Message> {
        self.tombstones.insert(id.clone());
        self.remove(id)
    }

    // -- Remote event folding ----------------------------------------------

    /// `added`: confirm an existing entry in place, or insert by `sent_at`.
    pub fn apply_added(&mut self, remote: Message) -> Merge {
        if self.is_tombstoned(&remote.id) {
            return Merge::Ignored;
        }
        match self.get_mut(&remote.id) {
            Some(entry) => {
                entry.text = remote.text;
                entry.sender_id = remote.sender_id;
                entry.sender_name = remote.sender_name;
                entry.kind = remote.kind;
                entry.is_edited = remote.is_edited;
                entry.reply_to_id = remote.reply_to_id;
                if entry.sent_at.is_none() {
                    entry.sent_at = remote.sent_at;
                }
                if remote.image_ref.is_some() {
                    entry.image_ref = remote.image_ref;
                    entry.local_image_bytes = None;
                    entry.is_uploading = false;
                    entry.upload_failed = false;
                }
                entry.delivery = DeliveryState::Sent;
                Merge::Confirmed
            }
            None => {
                let mut message = remote;
                message.delivery = DeliveryState::Sent;
                self.insert_ordered(message);
                Merge::Inserted
            }
        }
    }

    /// `updated`: replace the mutable fields; an unseen id is an implicit add.
    pub fn apply_updated(&mut self, remote: Message) -> Merge {
        if self.is_tombstoned(&remote.id) {
            return Merge::Ignored;
        }
        match self.get_mut(&remote.id) {
            Some(entry) => {
                if entry.text == remote.text && entry.is_edited == remote.is_edited {
                    return Merge::Ignored;
                }
                entry.text = remote.text;
                entry.is_edited = remote.is_edited;
                Merge::Updated
            }
            None => self.apply_added(remote),
        }
    }

    /// `deleted`: remove if present. The id is tombstoned either way so an
    /// `added` that arrives after its delete stays out.
    pub fn apply_deleted(&mut self, id: &MessageId) -> Merge {
        match self.forget(id) {
            Some(_) => Merge::Removed,
            None => Merge::Ignored,
        }
    }

    // -- Resync --------------------------------------------------------------

    /// Fold a fresh backend snapshot in and restore global `sent_at` order.
    ///
    /// `known` is [`persisted_ids`](Self::persisted_ids) taken when the fetch
    /// started. Those missing from the snapshot were deleted while the feed
    /// was down and are dropped. Entries confirmed after the fetch started
    /// stay, as do local pending or failed ones. Backend timestamps win over
    /// local ones.
    pub fn merge_snapshot(&mut self, snapshot: Vec<Message>, known: &HashSet<MessageId>) {
        let remote_ids: HashSet<MessageId> = snapshot.iter().map(|m| m.id.clone()).collect();
        self.messages.retain(|m| {
            !m.is_persisted() || !known.contains(&m.id) || remote_ids.contains(&m.id)
        });
        for message in snapshot {
            let (id, sent_at) = (message.id.clone(), message.sent_at);
            if self.apply_added(message) == Merge::Confirmed && sent_at.is_some() {
                if let Some(entry) = self.get_mut(&id) {
                    entry.sent_at = sent_at;
                }
            }
        }
        self.resort();
    }

    /// Stable full re-sort by `sent_at`.
    pub fn resort(&mut self) {
        self.messages.sort_by_key(order_key);
    }
}
