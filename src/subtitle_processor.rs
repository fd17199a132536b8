use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use regex::Regex;
use once_cell::sync::Lazy;
use anyhow::{Result, Context};
use log::{debug, warn};

use crate::timecode::TimeCode;

// @module: Subtitle track parsing and serialization

// @const: Inline markup such as <i>, </font>, <b>
static MARKUP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<[^>]+>").unwrap()
});

// @const: Stray sequence number left inside a text block
static BARE_INTEGER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+$").unwrap()
});

/// Separator token between the start and end timestamps
pub const TIMING_SEPARATOR: &str = "-->";

// @struct: Single subtitle entry
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEntry {
    // @field: Sequence number (1-based)
    pub seq_num: usize,

    // @field: Start time
    pub start: TimeCode,

    // @field: End time
    pub end: TimeCode,

    // @field: Subtitle text, lines joined with '\n'
    pub text: String,
}

impl SubtitleEntry {
    pub fn new(seq_num: usize, start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        SubtitleEntry {
            seq_num,
            start: TimeCode::from_millis(start_ms),
            end: TimeCode::from_millis(end_ms),
            text: text.into(),
        }
    }

    pub fn start_ms(&self) -> u64 {
        self.start.as_millis()
    }

    pub fn end_ms(&self) -> u64 {
        self.end.as_millis()
    }

    /// Whether `start < end`
    pub fn has_valid_span(&self) -> bool {
        self.end > self.start
    }

    /// Individual text lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines()
    }

    /// First characters of the text on a single line, for log output
    pub fn preview(&self, max_chars: usize) -> String {
        let flat = self.text.replace('\n', " ");
        if flat.chars().count() > max_chars {
            let head: String = flat.chars().take(max_chars).collect();
            format!("{}...", head)
        } else {
            flat
        }
    }
}

impl fmt::Display for SubtitleEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.seq_num)?;
        writeln!(f, "{} {} {}", self.start, TIMING_SEPARATOR, self.end)?;
        writeln!(f, "{}", self.text)
    }
}

/// Outcome of parsing a track: what was kept and what was not
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    /// Parsed entries in encounter order
    pub entries: Vec<SubtitleEntry>,

    /// Text blocks that appeared before any timing line
    pub skipped_blocks: usize,

    /// 1-based line numbers of the skipped text lines
    pub skipped_lines: Vec<usize>,

    /// Timing lines where at least one timestamp was malformed and read as zero
    pub zeroed_timings: usize,
}

impl ParseReport {
    /// True when nothing had to be skipped or zeroed
    pub fn is_clean(&self) -> bool {
        self.skipped_blocks == 0 && self.zeroed_timings == 0
    }
}

/// An ordered subtitle track
#[derive(Debug, Clone, Default)]
pub struct SubtitleTrack {
    /// File the track was read from, if any
    pub source_file: Option<PathBuf>,

    /// Entries in track order
    pub entries: Vec<SubtitleEntry>,
}

impl SubtitleTrack {
    pub fn new(entries: Vec<SubtitleEntry>) -> Self {
        SubtitleTrack {
            source_file: None,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read and parse a subtitle file
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<(Self, ParseReport)> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read subtitle file: {}", path.display()))?;

        let report = Self::parse(&content);
        let track = SubtitleTrack {
            source_file: Some(path.to_path_buf()),
            entries: report.entries.clone(),
        };
        Ok((track, report))
    }

    /// Serialize and write the track to a file
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        fs::write(path, Self::format(&self.entries))
            .with_context(|| format!("Failed to write subtitle file: {}", path.display()))
    }

    /// Keep every entry whose 0-based position is not in `removed`, preserving order
    pub fn retain_indices(&self, removed: &[usize]) -> Vec<SubtitleEntry> {
        let removed: HashSet<usize> = removed.iter().copied().collect();
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, _)| !removed.contains(i))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Parse raw subtitle text
    ///
    /// Any line containing `-->` opens a new entry. Non-blank lines after a
    /// timing line are cleaned (markup removed, trimmed, bare integers dropped)
    /// and appended to the open entry. Text seen before the first timing line
    /// cannot belong to anything and is reported as a skipped block.
    pub fn parse(content: &str) -> ParseReport {
        let mut report = ParseReport::default();
        let mut current: Option<SubtitleEntry> = None;
        let mut in_skipped_block = false;

        for (line_idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();

            if trimmed.is_empty() {
                in_skipped_block = false;
                continue;
            }

            if trimmed.contains(TIMING_SEPARATOR) {
                if let Some(entry) = current.take() {
                    report.entries.push(entry);
                }

                let (start, end, clean) = Self::parse_timing_line(trimmed);
                if !clean {
                    report.zeroed_timings += 1;
                    warn!("Malformed timing at line {}: {}", line_idx + 1, trimmed);
                }

                current = Some(SubtitleEntry {
                    seq_num: report.entries.len() + 1,
                    start,
                    end,
                    text: String::new(),
                });
                continue;
            }

            let cleaned = Self::clean_text_line(trimmed);
            if cleaned.is_empty() {
                continue;
            }

            match current.as_mut() {
                Some(entry) => {
                    if !entry.text.is_empty() {
                        entry.text.push('\n');
                    }
                    entry.text.push_str(&cleaned);
                }
                None => {
                    if !in_skipped_block {
                        report.skipped_blocks += 1;
                        in_skipped_block = true;
                    }
                    report.skipped_lines.push(line_idx + 1);
                    debug!("Skipping text before any timing line at line {}: {}", line_idx + 1, trimmed);
                }
            }
        }

        if let Some(entry) = current.take() {
            report.entries.push(entry);
        }

        report
    }

    /// Serialize entries, renumbering them 1..N
    pub fn format(entries: &[SubtitleEntry]) -> String {
        let mut out = String::new();
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let renumbered = SubtitleEntry {
                seq_num: i + 1,
                ..entry.clone()
            };
            out.push_str(&renumbered.to_string());
        }
        out
    }

    /// Split `start --> end`, reading each side leniently
    ///
    /// Only the first whitespace-separated token on each side is a timestamp;
    /// anything after it (position hints) is ignored.
    fn parse_timing_line(line: &str) -> (TimeCode, TimeCode, bool) {
        let (left, right) = line.split_once(TIMING_SEPARATOR).unwrap_or((line, ""));
        let left = left.split_whitespace().last().unwrap_or("");
        let right = right.split_whitespace().next().unwrap_or("");

        let clean = TimeCode::parse(left).is_ok() && TimeCode::parse(right).is_ok();
        (TimeCode::parse_lenient(left), TimeCode::parse_lenient(right), clean)
    }

    /// Strip markup and surrounding whitespace, drop stray sequence numbers
    fn clean_text_line(line: &str) -> String {
        let stripped = MARKUP_REGEX.replace_all(line, "");
        let stripped = stripped.trim();
        if BARE_INTEGER_REGEX.is_match(stripped) {
            return String::new();
        }
        stripped.to_string()
    }
}

impl fmt::Display for SubtitleTrack {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&Self::format(&self.entries))
    }
}
