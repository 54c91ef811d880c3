//! Presence subscriptions, one per observed user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use parley_shared::{ChatBackend, Clock, Presence, Result, Subscription, UserId};

use crate::events::{EventBus, SyncEvent};
use crate::session::SyncContext;

struct Watcher {
    generation: u64,
    latest: watch::Receiver<Presence>,
    // Released when the watcher is replaced or stopped.
    _subscription: Subscription,
}

#[derive(Default)]
struct Watchers {
    by_user: HashMap<UserId, Watcher>,
    next_generation: u64,
}

/// Tracks presence ticks of observed users.
///
/// At most one backend subscription exists per user: observing a user again
/// tears the old subscription down before the new one is made. Ticks that
/// arrive for a replaced subscription are dropped.
#[derive(Clone)]
pub struct PresenceTracker {
    backend: Arc<dyn ChatBackend>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    watchers: Arc<Mutex<Watchers>>,
}

impl PresenceTracker {
    pub fn new(ctx: &SyncContext) -> Self {
        Self {
            backend: Arc::clone(&ctx.backend),
            clock: Arc::clone(&ctx.clock),
            events: ctx.events.clone(),
            watchers: Arc::new(Mutex::new(Watchers::default())),
        }
    }

    fn watchers(&self) -> MutexGuard<'_, Watchers> {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start observing `user_id`; the receiver always holds the latest
    /// presence. A user whose presence was never written reads as offline
    /// since now.
    pub async fn observe(&self, user_id: &UserId) -> Result<watch::Receiver<Presence>> {
        self.stop(user_id);

        let stream = self.backend.observe_presence(user_id).await?;
        let (tx, rx) = watch::channel(Presence::offline_since(self.clock.now()));

        let generation = {
            let mut watchers = self.watchers();
            watchers.next_generation += 1;
            let generation = watchers.next_generation;
            // A concurrent observe may have won the race; the latest call wins.
            if watchers.by_user.remove(user_id).is_some() {
                debug!(user = %user_id, "Replacing concurrent presence watcher");
            }
            watchers.by_user.insert(
                user_id.clone(),
                Watcher {
                    generation,
                    latest: rx.clone(),
                    _subscription: stream.subscription,
                },
            );
            generation
        };

        info!(user = %user_id, "Observing presence");
        tokio::spawn(
            self.clone()
                .forward(user_id.clone(), generation, stream.events, tx),
        );
        Ok(rx)
    }

    async fn forward(
        self,
        user_id: UserId,
        generation: u64,
        mut ticks: mpsc::Receiver<Option<Presence>>,
        tx: watch::Sender<Presence>,
    ) {
        while let Some(tick) = ticks.recv().await {
            if !self.is_current(&user_id, generation) {
                break;
            }
            let presence = tick.unwrap_or_else(|| Presence::offline_since(self.clock.now()));
            tx.send_replace(presence);
            debug!(user = %user_id, online = presence.is_online, "Presence tick");
            self.events.emit(SyncEvent::PresenceChanged {
                user_id: user_id.clone(),
                presence,
            });
        }

        if self.is_current(&user_id, generation) {
            warn!(user = %user_id, "Presence feed ended");
            self.watchers().by_user.remove(&user_id);
        }
    }

    fn is_current(&self, user_id: &UserId, generation: u64) -> bool {
        self.watchers().by_user.get(user_id).map(|w| w.generation) == Some(generation)
    }

    /// Stop observing `user_id`. Returns whether it was observed.
    pub fn stop(&self, user_id: &UserId) -> bool {
        let removed = self.watchers().by_user.remove(user_id);
        if removed.is_some() {
            info!(user = %user_id, "Stopped observing presence");
        }
        removed.is_some()
    }

    pub fn stop_all(&self) {
        let drained: Vec<_> = self.watchers().by_user.drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Stopped all presence watchers");
        }
    }

    pub fn is_observing(&self, user_id: &UserId) -> bool {
        self.watchers().by_user.contains_key(user_id)
    }

    /// Latest presence of an observed user.
    pub fn current(&self, user_id: &UserId) -> Option<Presence> {
        self.watchers()
            .by_user
            .get(user_id)
            .map(|w| *w.latest.borrow())
    }
}
