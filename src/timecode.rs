//! Subtitle timestamp parsing and normalization.
//!
//! Source documents carry timestamps as `H+:MM:SS` with an optional
//! fractional part after `,` or `.` and an unbounded hour field. Parsing
//! folds whole days out of the hour field and normalizes the separator to
//! `.`; the fractional digits are carried verbatim so `01,000` and `01,0`
//! stay distinguishable in the rendered form.

use std::fmt;

/// A timestamp string did not match `[D ]H+:MM:SS[.,fff]`.
#[derive(Debug, Clone)]
pub struct MalformedTimeError {
    pub input: String,
}

impl fmt::Display for MalformedTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed time value {:?}", self.input)
    }
}

impl std::error::Error for MalformedTimeError {}

/// A normalized playback timestamp.
///
/// Renders as `[D ]H:MM:SS[.fff]` with hours below 24, which is also a
/// valid PostgreSQL `interval` literal. [`TimeCode::parse`] accepts its own
/// rendered form, so parse and render round-trip.
#[derive(Debug, Clone)]
pub struct TimeCode {
    days: u32,
    hours: u32,
    minutes: u32,
    seconds: u32,
    frac: String,
}

impl TimeCode {
    pub fn parse(input: &str) -> Result<Self, MalformedTimeError> {
        let err = || MalformedTimeError {
            input: input.to_string(),
        };

        let trimmed = input.trim();
        let (day_part, clock) = match trimmed.split_once(' ') {
            Some((d, rest)) if !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()) => {
                (d, rest.trim_start())
            }
            _ => ("0", trimmed),
        };
        let mut days: u32 = day_part.parse().map_err(|_| err())?;

        let mut fields = clock.split(':');
        let (h, m, s) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(h), Some(m), Some(s), None) => (h, m, s),
            _ => return Err(err()),
        };

        let mut hours: u32 = h.parse().map_err(|_| err())?;
        let minutes: u32 = m.parse().map_err(|_| err())?;
        if minutes > 59 {
            return Err(err());
        }

        let (s, frac) = match s.split_once([',', '.']) {
            Some((whole, frac)) => (whole, frac),
            None => (s, ""),
        };
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let seconds: u32 = s.parse().map_err(|_| err())?;
        if seconds > 59 {
            return Err(err());
        }

        days += hours / 24;
        hours %= 24;

        Ok(TimeCode {
            days,
            hours,
            minutes,
            seconds,
            frac: frac.to_string(),
        })
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.days > 0 {
            write!(f, "{} ", self.days)?;
        }
        write!(f, "{}:{:02}:{:02}", self.hours, self.minutes, self.seconds)?;
        if !self.frac.is_empty() {
            write!(f, ".{}", self.frac)?;
        }
        Ok(())
    }
}

/// Fractions compare with trailing zeros trimmed, so `01.5` and `01.500`
/// denote the same instant.
impl PartialEq for TimeCode {
    fn eq(&self, other: &Self) -> bool {
        self.days == other.days
            && self.hours == other.hours
            && self.minutes == other.minutes
            && self.seconds == other.seconds
            && self.frac.trim_end_matches('0') == other.frac.trim_end_matches('0')
    }
}

impl Eq for TimeCode {}
