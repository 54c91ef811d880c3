//! Per-client runtime state.
//!
//! The [`ClientState`] struct lives behind a mutex inside
//! [`ChatClient`](crate::ChatClient) and records what the UI currently has
//! on screen.

use parley_shared::{ChatId, UserId};

/// What the client currently has open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientState {
    /// The chat shown in the conversation view.
    /// `None` while only the chat list is visible.
    pub open_chat: Option<ChatId>,

    /// The other participant of `open_chat`, whose presence is observed.
    pub open_peer: Option<UserId>,

    /// Whether the chat list feed has been started for the current user.
    pub chat_list_started: bool,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `chat_id` with `peer` as the open chat, returning the peer of
    /// the chat it replaces.
    pub fn open(&mut self, chat_id: ChatId, peer: UserId) -> Option<UserId> {
        self.open_chat = Some(chat_id);
        self.open_peer.replace(peer)
    }

    /// Forget the open chat, returning it and its peer.
    pub fn close(&mut self) -> Option<(ChatId, UserId)> {
        let chat = self.open_chat.take();
        let peer = self.open_peer.take();
        chat.zip(peer)
    }

    pub fn is_open(&self, chat_id: &ChatId) -> bool {
        self.open_chat.as_ref() == Some(chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_replaces_previous_peer() {
        let mut state = ClientState::new();
        assert_eq!(state.open(ChatId::from("a_b"), UserId::new("b")), None);
        assert_eq!(
            state.open(ChatId::from("a_c"), UserId::new("c")),
            Some(UserId::new("b"))
        );
        assert!(state.is_open(&ChatId::from("a_c")));
        assert!(!state.is_open(&ChatId::from("a_b")));
    }

    #[test]
    fn test_close_clears_both_fields() {
        let mut state = ClientState::new();
        state.open(ChatId::from("a_b"), UserId::new("b"));
        assert_eq!(
            state.close(),
            Some((ChatId::from("a_b"), UserId::new("b")))
        );
        assert_eq!(state, ClientState::default());
        assert_eq!(state.close(), None);
    }
}
