//! # parley-store
//!
//! In-process implementation of the parley backend.
//!
//! [`MemoryBackend`] keeps messages, chat summaries, memberships, blobs and
//! presence in memory and fans realtime events out to every live
//! subscription, the same way the hosted backend does. Tests and the
//! simulator drive it directly: inject failures with
//! [`MemoryBackend::fail_next`], hold uploads with
//! [`MemoryBackend::pause_uploads`], and play the other participant with the
//! `remote_*` helpers.

pub mod blobs;
pub mod chats;
pub mod faults;
pub mod memory;
pub mod messages;
pub mod presence;

pub use faults::Op;
pub use memory::MemoryBackend;
