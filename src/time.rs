use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use log::error;
use serde::{Deserialize, Serialize};
use ::time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime};

const MINUTE: i64 = 60 * 1000;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Milliseconds since the unix epoch.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[cfg_attr(feature = "backend-sql", derive(sqlx::Type), sqlx(transparent))]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Result<Self, ()> {
        use std::time::SystemTime;

        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .map(Self)
            .map_err(|e| {
                error!("couldn't get time: {e:?}");
            })
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    /// The first timestamp strictly after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    fn datetime(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(self.0 as i128 * 1_000_000).ok()
    }

    /// How long ago `self` was, as seen from `now`, in the form shown next to a note.
    pub fn relative_to(self, now: Timestamp) -> String {
        let diff = (now.0 - self.0).abs();
        let days = diff / DAY;

        match days {
            0 => {
                let hours = diff / HOUR;
                if hours > 0 {
                    return format!("{hours} hour{} ago", plural(hours));
                }
                let minutes = diff / MINUTE;
                if minutes > 0 {
                    return format!("{minutes} minute{} ago", plural(minutes));
                }
                "Just now".into()
            }
            1 => "Yesterday".into(),
            2..=6 => format!("{days} days ago"),
            _ => {
                let format = format_description!("[month repr:short] [day padding:none], [year]");

                self.datetime()
                    .and_then(|when| when.format(format).ok())
                    .unwrap_or_else(|| self.to_string())
            }
        }
    }
}

fn plural(n: i64) -> &'static str {
    if n > 1 {
        "s"
    } else {
        ""
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self(0)
    }
}

impl FromStr for Timestamp {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(fmt, "<epoch>");
        }

        let formatted = self.datetime().and_then(|when| when.format(&Rfc3339).ok());

        match formatted {
            Some(s) => write!(fmt, "{}", s),
            None => write!(fmt, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ago(ms: i64) -> String {
        let now = Timestamp::from_millis(1_700_000_000_000);
        Timestamp::from_millis(now.millis() - ms).relative_to(now)
    }

    #[test]
    fn relative_within_a_day() {
        assert_eq!(ago(0), "Just now");
        assert_eq!(ago(59 * 1000), "Just now");
        assert_eq!(ago(MINUTE), "1 minute ago");
        assert_eq!(ago(5 * MINUTE + 30 * 1000), "5 minutes ago");
        assert_eq!(ago(HOUR), "1 hour ago");
        assert_eq!(ago(23 * HOUR), "23 hours ago");
    }

    #[test]
    fn relative_days() {
        assert_eq!(ago(DAY), "Yesterday");
        assert_eq!(ago(2 * DAY), "2 days ago");
        assert_eq!(ago(6 * DAY + HOUR), "6 days ago");
    }

    #[test]
    fn relative_falls_back_to_date() {
        // 2023-11-14T22:13:20Z minus a week
        assert_eq!(ago(7 * DAY), "Nov 7, 2023");
    }

    #[test]
    fn display() {
        assert_eq!(Timestamp::default().to_string(), "<epoch>");
        assert_eq!(
            Timestamp::from_millis(1_700_000_000_000).to_string(),
            "2023-11-14T22:13:20Z"
        );
    }

    #[test]
    fn next_is_strictly_later() {
        let t = Timestamp::from_millis(10);
        assert!(t.next() > t);
        assert_eq!("10".parse::<Timestamp>().unwrap(), t);
    }
}
