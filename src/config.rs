//! Resolution of time window and image size arguments.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// Closed time range `[start, end]` covered by a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `duration_secs` ending at `end`. `end` is Unix seconds; when
    /// it is absent or unparseable the window ends now.
    pub fn resolve(end: Option<&str>, duration_secs: u64) -> Self {
        Self::resolve_at(end, duration_secs, Utc::now())
    }

    fn resolve_at(end: Option<&str>, duration_secs: u64, now: DateTime<Utc>) -> Self {
        let end = end
            .and_then(|s| s.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or(now);
        let start = chrono::Duration::try_seconds(duration_secs.min(i64::MAX as u64) as i64)
            .and_then(|d| end.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }

    pub fn start_secs(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_secs(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn duration_secs(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {}",
            self.start.format("%Y-%m-%d %H:%M:%S UTC"),
            self.end.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// Chart size in pixels, parsed from `WIDTHxHEIGHT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ImageSize {
    fn default() -> Self {
        Self {
            width: 800,
            height: 300,
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("invalid size '{}': expected WIDTHxHEIGHT", s))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("invalid size '{}': dimensions must be positive integers", s))
        };
        Ok(Self {
            width: parse(w)?,
            height: parse(h)?,
        })
    }
}
