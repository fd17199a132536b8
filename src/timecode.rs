use std::fmt;
use std::str::FromStr;
use log::debug;

use crate::errors::SubtitleError;

// @module: Millisecond time values for subtitle timing

/// A point in time, in whole milliseconds from the start of the media
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeCode(u64);

impl TimeCode {
    /// The zero timestamp, also what a malformed timestamp degrades to
    pub const ZERO: TimeCode = TimeCode(0);

    pub const fn from_millis(ms: u64) -> Self {
        TimeCode(ms)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Seconds as a float, used to build tool arguments
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn saturating_add_ms(&self, ms: u64) -> Self {
        TimeCode(self.0.saturating_add(ms))
    }

    /// Parse `HH:MM:SS,mmm` or `HH:MM:SS.mmm`
    ///
    /// The fractional part is right-padded or truncated to exactly three
    /// digits, so `01:02:03,5` is 500 ms and `01:02:03,12345` is 123 ms.
    pub fn parse(text: &str) -> Result<Self, SubtitleError> {
        let trimmed = text.trim();
        let normalized = trimmed.replace(',', ".");
        let parts: Vec<&str> = normalized.split(':').collect();
        if parts.len() != 3 {
            return Err(SubtitleError::Format(trimmed.to_string()));
        }

        let (seconds_part, fraction_part) = match parts[2].split_once('.') {
            Some((secs, frac)) => (secs, Some(frac)),
            None => (parts[2], None),
        };

        let format_error = || SubtitleError::Format(trimmed.to_string());

        // Digits only: `u64::from_str` would also take a leading `+`
        let parse_component = |s: &str| -> Result<u64, SubtitleError> {
            let s = s.trim();
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format_error());
            }
            s.parse::<u64>().map_err(|_| format_error())
        };

        let hours = parse_component(parts[0])?;
        let minutes = parse_component(parts[1])?;
        let seconds = parse_component(seconds_part)?;
        let millis = match fraction_part {
            Some(frac) => {
                let mut digits: String = frac.chars().take(3).collect();
                while digits.len() < 3 {
                    digits.push('0');
                }
                parse_component(&digits)?
            }
            None => 0,
        };

        hours
            .checked_mul(3600)
            .and_then(|total| total.checked_add(minutes.checked_mul(60)?))
            .and_then(|total| total.checked_add(seconds))
            .and_then(|total| total.checked_mul(1000))
            .and_then(|total| total.checked_add(millis))
            .map(TimeCode)
            .ok_or_else(format_error)
    }

    /// Permissive parse used by the track reader: malformed input is zero
    pub fn parse_lenient(text: &str) -> Self {
        match Self::parse(text) {
            Ok(tc) => tc,
            Err(e) => {
                debug!("{}, using 00:00:00,000", e);
                Self::ZERO
            }
        }
    }

    /// Format as `HH:MM:SS,mmm`
    pub fn format(&self) -> String {
        let ms = self.0;
        let hours = ms / 3_600_000;
        let minutes = (ms % 3_600_000) / 60_000;
        let seconds = (ms % 60_000) / 1_000;
        let millis = ms % 1_000;

        format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl FromStr for TimeCode {
    type Err = SubtitleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for TimeCode {
    fn from(ms: u64) -> Self {
        TimeCode(ms)
    }
}
