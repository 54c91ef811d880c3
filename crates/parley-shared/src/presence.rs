//! Human-readable presence status.
//!
//! The status is always derived from `(is_online, last_seen_at, now)` at
//! display time and never stored, because "today" and "yesterday" shift as
//! real time passes.

use chrono::{DateTime, Days, Local, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::constants::{LAST_SEEN_DATE_FORMAT, LAST_SEEN_TIME_FORMAT};
use crate::models::Presence;

/// Renderable presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    LastSeenToday(NaiveTime),
    LastSeenYesterday(NaiveTime),
    LastSeenOn(NaiveDate),
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceStatus::Online => f.write_str("online"),
            PresenceStatus::LastSeenToday(t) => {
                write!(f, "last seen today at {}", t.format(LAST_SEEN_TIME_FORMAT))
            }
            PresenceStatus::LastSeenYesterday(t) => {
                write!(f, "last seen yesterday at {}", t.format(LAST_SEEN_TIME_FORMAT))
            }
            PresenceStatus::LastSeenOn(d) => {
                write!(f, "last seen on {}", d.format(LAST_SEEN_DATE_FORMAT))
            }
        }
    }
}

/// Derive the display status of `presence` relative to `now`.
///
/// Calendar days are evaluated in `now`'s time zone.
pub fn display_status<Tz: TimeZone>(presence: &Presence, now: &DateTime<Tz>) -> PresenceStatus {
    if presence.is_online {
        return PresenceStatus::Online;
    }

    let Some(seen_utc) = DateTime::<Utc>::from_timestamp(presence.last_seen_at, 0) else {
        return PresenceStatus::LastSeenOn(now.date_naive());
    };
    let seen = seen_utc.with_timezone(&now.timezone());

    let today = now.date_naive();
    let seen_day = seen.date_naive();

    if seen_day == today {
        PresenceStatus::LastSeenToday(seen.time())
    } else if today.checked_sub_days(Days::new(1)) == Some(seen_day) {
        PresenceStatus::LastSeenYesterday(seen.time())
    } else {
        PresenceStatus::LastSeenOn(seen_day)
    }
}

/// [`display_status`] against the device's local clock and time zone.
pub fn display_status_now(presence: &Presence) -> PresenceStatus {
    display_status(presence, &Local::now())
}
