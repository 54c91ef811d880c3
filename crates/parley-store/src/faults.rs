//! Failure injection and call accounting.

use std::collections::{HashMap, VecDeque};

use parley_shared::SyncError;

/// Backend operations that can be counted and made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FetchMessages,
    SubscribeMessages,
    PersistMessage,
    UpdateMessage,
    DeleteMessage,
    EnsureChat,
    RemoveMembership,
    FetchChats,
    SubscribeChats,
    UpdateSummary,
    UploadBlob,
    ObservePresence,
    SetPresence,
}

/// Queued failures plus a per-operation call counter.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    queued: HashMap<Op, VecDeque<SyncError>>,
    calls: HashMap<Op, usize>,
}

impl Faults {
    pub(crate) fn push(&mut self, op: Op, error: SyncError) {
        self.queued.entry(op).or_default().push_back(error);
    }

    /// Count a call to `op` and pop its next queued failure, if any.
    pub(crate) fn check(&mut self, op: Op) -> Result<(), SyncError> {
        *self.calls.entry(op).or_default() += 1;
        match self.queued.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => {
                tracing::debug!(?op, error = %err, "Injected backend failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    pub(crate) fn calls(&self, op: Op) -> usize {
        self.calls.get(&op).copied().unwrap_or(0)
    }
}
