//! Engine configuration loaded from environment variables.
//!
//! Every setting has a default, so the engine runs without any
//! configuration in tests and in the simulator.

use parley_shared::constants::{
    CHAT_ID_SEPARATOR, EVENT_BUFFER, IMAGE_PREVIEW_TEXT, MAX_IMAGE_BYTES, UPLOAD_ROOT,
};

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Joins the two sorted participant ids into a chat id.
    /// Env: `PARLEY_CHAT_ID_SEPARATOR`
    /// Default: `_`
    pub chat_id_separator: String,

    /// Capacity of the engine's broadcast event channel.
    /// Env: `PARLEY_EVENT_BUFFER`
    /// Default: `256`
    pub event_buffer: usize,

    /// Root key for uploaded chat images (`<root>/<chat>/<message>.jpg`).
    /// Env: `PARLEY_UPLOAD_ROOT`
    /// Default: `chat_images`
    pub upload_root: String,

    /// Largest image accepted by the upload pipeline.
    /// Env: `PARLEY_MAX_IMAGE_BYTES`
    /// Default: 10 MiB
    pub max_image_bytes: usize,

    /// Chat-list text for an image message without a caption.
    /// Env: `PARLEY_IMAGE_PREVIEW`
    /// Default: `Photo`
    pub image_preview: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chat_id_separator: CHAT_ID_SEPARATOR.to_string(),
            event_buffer: EVENT_BUFFER,
            upload_root: UPLOAD_ROOT.to_string(),
            max_image_bytes: MAX_IMAGE_BYTES,
            image_preview: IMAGE_PREVIEW_TEXT.to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(sep) = lookup("PARLEY_CHAT_ID_SEPARATOR") {
            if sep.is_empty() {
                tracing::warn!("Empty PARLEY_CHAT_ID_SEPARATOR, using default");
            } else {
                config.chat_id_separator = sep;
            }
        }

        if let Some(val) = lookup("PARLEY_EVENT_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.event_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid PARLEY_EVENT_BUFFER, using default"),
            }
        }

        if let Some(root) = lookup("PARLEY_UPLOAD_ROOT") {
            let root = root.trim_matches('/').to_string();
            if !root.is_empty() {
                config.upload_root = root;
            }
        }

        if let Some(val) = lookup("PARLEY_MAX_IMAGE_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_image_bytes = n,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid PARLEY_MAX_IMAGE_BYTES, using default"
                ),
            }
        }

        if let Some(text) = lookup("PARLEY_IMAGE_PREVIEW") {
            config.image_preview = text;
        }

        config
    }
}
