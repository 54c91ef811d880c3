//! Signed-in user context and the dependency bundle handed to each engine
//! component at construction.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use parley_shared::{ChatBackend, Clock, Result, SyncError, UserId};

use crate::config::SyncConfig;
use crate::events::EventBus;

/// The user the engine acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub display_name: String,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
        }
    }
}

/// Shared, swappable session state. Clones observe the same user.
#[derive(Debug, Clone, Default)]
pub struct Session {
    user: Arc<RwLock<Option<CurrentUser>>>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user: CurrentUser) -> Self {
        let session = Self::default();
        session.sign_in(user);
        session
    }

    pub fn sign_in(&self, user: CurrentUser) {
        tracing::info!(user = %user.id, "Session signed in");
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    /// Clear the session, returning the user that was signed in.
    pub fn sign_out(&self) -> Option<CurrentUser> {
        let previous = self.user.write().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(user) = &previous {
            tracing::info!(user = %user.id, "Session signed out");
        }
        previous
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The signed-in user, or `NotAuthenticated`.
    pub fn require_user(&self) -> Result<CurrentUser> {
        self.current_user().ok_or(SyncError::NotAuthenticated)
    }
}

/// Everything an engine component needs from its surroundings.
#[derive(Clone)]
pub struct SyncContext {
    pub backend: Arc<dyn ChatBackend>,
    pub session: Session,
    pub clock: Arc<dyn Clock>,
    pub config: SyncConfig,
    pub events: EventBus,
}

impl SyncContext {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        session: Session,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let events = EventBus::new(config.event_buffer);
        Self {
            backend,
            session,
            clock,
            config,
            events,
        }
    }
}
