//! # parley-shared
//!
//! Types shared by every parley crate: identifiers, the message and chat
//! summary models, realtime event shapes, the backend trait the engine is
//! written against, and the error taxonomy.

pub mod backend;
pub mod clock;
pub mod constants;
pub mod error;
pub mod models;
pub mod presence;
pub mod protocol;
pub mod types;

pub use backend::{ChatBackend, EventStream, Subscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, SyncError};
pub use models::{
    ChatSummary, DeliveryState, ImageRef, LastMessage, Message, MessageKind, Presence,
};
pub use presence::{display_status, display_status_now, PresenceStatus};
pub use protocol::{ChatSignal, MessageEvent};
pub use types::{ChatId, MessageId, UserId};
