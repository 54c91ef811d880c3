use tracing::debug;

use parley_shared::{EventStream, Presence, UserId};

use crate::memory::{fan_out, MemoryBackend};

impl MemoryBackend {
    /// Register a presence listener. The current value (or `None` when the
    /// node was never written) is delivered first, like a realtime-tree
    /// `onValue` listener.
    pub(crate) fn listen_presence(&self, user_id: &UserId) -> EventStream<Option<Presence>> {
        let key = user_id.clone();
        let stream =
            self.register(move |inner| inner.presence_listeners.entry(key.clone()).or_default());

        let inner = self.lock();
        let current = inner.presence.get(user_id).copied();
        if let Some(newest) = inner.presence_listeners.get(user_id).and_then(|l| l.last()) {
            if !newest.offer(current) {
                debug!(user = %user_id, "Initial presence not delivered");
            }
        }
        stream
    }

    pub(crate) fn write_presence(&self, user_id: &UserId, presence: Presence) {
        let mut inner = self.lock();
        inner.presence.insert(user_id.clone(), presence);
        if let Some(listeners) = inner.presence_listeners.get_mut(user_id) {
            fan_out(listeners, Some(presence));
        }
    }

    // -- Simulation helpers ------------------------------------------------

    pub fn presence_of(&self, user_id: &UserId) -> Option<Presence> {
        self.lock().presence.get(user_id).copied()
    }

    pub fn presence_listener_count(&self, user_id: &UserId) -> usize {
        self.lock()
            .presence_listeners
            .get(user_id)
            .map(|l| l.iter().filter(|l| !l.is_closed()).count())
            .unwrap_or(0)
    }
}
