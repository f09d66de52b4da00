//! Capture cadence: which ticks of the periodic loop actually capture.
//!
//! Windows are wall-clock ranges in one IANA time zone, half-open
//! (`start <= t < end`), and may wrap midnight:
//! - quiet: no capture at all; resets the throttle counter.
//! - throttle: only every `n`-th tick inside the window captures.
//!
//! Examples (Asia/Kolkata, defaults):
//! - 2024-03-14 22:00Z = 03:30 IST -> quiet
//! - 2024-03-14 18:10Z = 23:40 IST -> throttled twice, then capture
//! - 2024-03-14 06:00Z = 11:30 IST -> capture

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum CadenceError {
    #[error("unknown time zone {0:?}")]
    TimeZone(String),

    #[error("bad wall-clock time {0:?}, expected HH:MM")]
    Time(String),

    #[error("throttle must capture every n >= 1 ticks")]
    ZeroThrottle,
}

/// Half-open local time range, possibly wrapping midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl LocalWindow {
    /// Parse `HH:MM` bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, CadenceError> {
        let p = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| CadenceError::Time(s.to_string()))
        };
        Ok(Self {
            start: p(start)?,
            end: p(end)?,
        })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Outcome for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Capture,
    Quiet,
    /// Inside the throttle window and not this tick's turn.
    Throttled { tick: u32 },
}

#[derive(Debug, Clone)]
pub struct CadencePolicy {
    tz: Tz,
    quiet: Option<LocalWindow>,
    throttle: Option<(LocalWindow, u32)>,
    counter: u32,
}

impl CadencePolicy {
    /// Capture on every tick.
    pub fn always(tz: Tz) -> Self {
        Self {
            tz,
            quiet: None,
            throttle: None,
            counter: 0,
        }
    }

    pub fn parse_tz(name: &str) -> Result<Tz, CadenceError> {
        name.parse::<Tz>()
            .map_err(|_| CadenceError::TimeZone(name.to_string()))
    }

    pub fn with_quiet(mut self, window: LocalWindow) -> Self {
        self.quiet = Some(window);
        self
    }

    pub fn with_throttle(mut self, window: LocalWindow, every: u32) -> Result<Self, CadenceError> {
        if every == 0 {
            return Err(CadenceError::ZeroThrottle);
        }
        self.throttle = Some((window, every));
        Ok(self)
    }

    pub fn decide(&mut self, now: DateTime<Utc>) -> TickDecision {
        let local = now.with_timezone(&self.tz).time();

        if self.quiet.is_some_and(|w| w.contains(local)) {
            self.counter = 0;
            debug!(%local, "quiet window, tick skipped");
            return TickDecision::Quiet;
        }

        if let Some((_, every)) = self.throttle.filter(|(w, _)| w.contains(local)) {
            self.counter += 1;
            if self.counter % every != 0 {
                debug!(%local, tick = self.counter, "throttle window, tick skipped");
                return TickDecision::Throttled { tick: self.counter };
            }
            self.counter = 0;
        }
        TickDecision::Capture
    }
}
