//! Remaining time for time-boxed (private) frequencies.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeLeft {
    /// Whole hours, not capped at a day.
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub expired: bool,
}

impl TimeLeft {
    pub const EXPIRED: TimeLeft = TimeLeft {
        hours: 0,
        minutes: 0,
        seconds: 0,
        expired: true,
    };
}

impl fmt::Display for TimeLeft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expired {
            return f.write_str("Expired");
        }
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// Time left until `expires_at` as seen at `now`.
pub fn evaluate(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> TimeLeft {
    if now >= expires_at {
        return TimeLeft::EXPIRED;
    }
    let total_secs = ((expires_at - now).num_milliseconds() / 1000) as u64;
    TimeLeft {
        hours: total_secs / 3600,
        minutes: (total_secs % 3600) / 60,
        seconds: total_secs % 60,
        expired: false,
    }
}

/// One [`TimeLeft`] per second, ending after the first expired value.
///
/// For callers that don't own a timer of their own.
pub fn ticker(expires_at: DateTime<Utc>) -> impl Stream<Item = TimeLeft> {
    let interval = tokio::time::interval(Duration::from_secs(1));
    futures_util::stream::unfold((interval, false), move |(mut interval, done)| async move {
        if done {
            return None;
        }
        interval.tick().await;
        let left = evaluate(expires_at, Utc::now());
        Some((left, (interval, left.expired)))
    })
}
