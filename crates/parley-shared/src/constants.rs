/// Application name
pub const APP_NAME: &str = "Parley";

/// Separator placed between the two sorted participant ids of a chat id
pub const CHAT_ID_SEPARATOR: &str = "_";

/// Capacity of the per-subscription event channels
pub const EVENT_BUFFER: usize = 256;

/// Root key under which chat images are uploaded
pub const UPLOAD_ROOT: &str = "chat_images";

/// Maximum image upload size in bytes (10 MiB)
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Chat-list preview for an image message without caption
pub const IMAGE_PREVIEW_TEXT: &str = "Photo";

/// Date format used by "last seen on <date>"
pub const LAST_SEEN_DATE_FORMAT: &str = "%d %b %Y";

/// Time format used by "last seen today/yesterday at HH:MM"
pub const LAST_SEEN_TIME_FORMAT: &str = "%H:%M";
