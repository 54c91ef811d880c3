//! # parley-sync
//!
//! The message synchronisation engine.
//!
//! - [`MessageReconciler`]: optimistic view of the open chat merged with its
//!   realtime feed.
//! - [`UploadPipeline`]: image uploads, one job per message.
//! - [`ChatSummaryAggregator`]: the chat list, ordered by recency.
//! - [`PresenceTracker`]: one presence subscription per observed user.
//! - [`LastMessageInvariant`]: keeps each chat's cached last message on the
//!   latest persisted message after sends, edits and deletes.
//!
//! Components are built from a [`SyncContext`] and report to the UI through
//! the context's [`EventBus`].

pub mod aggregator;
pub mod config;
pub mod events;
pub mod last_message;
pub mod presence;
pub mod reconciler;
pub mod session;
pub mod timeline;
pub mod upload;

pub use aggregator::{ChatList, ChatSummaryAggregator};
pub use config::SyncConfig;
pub use events::{EventBus, SyncEvent};
pub use last_message::{LastMessageInvariant, SummaryChange, SummarySink, SummaryUpdate};
pub use presence::PresenceTracker;
pub use reconciler::{Composer, MessageReconciler, SyncStatus};
pub use session::{CurrentUser, Session, SyncContext};
pub use timeline::{Merge, Timeline};
pub use upload::{UploadJob, UploadKey, UploadPipeline};
