/*!
 * Common test utilities for the loudsub test suite
 */

use std::path::{Path, PathBuf};
use std::fs;
use anyhow::Result;
use tempfile::TempDir;

use loudsub::subtitle_processor::SubtitleEntry;

// Re-export the mock analysis module
pub mod mock_analysis;

/// Route library logs to the test output; `RUST_LOG=debug` shows per-line levels
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Creates an empty stand-in for a media file; mocks never read it
pub fn create_test_media(dir: &Path) -> Result<PathBuf> {
    create_test_file(dir, "media.wav", "")
}

/// Sample track with four entries, one second each, starting at 1s, 3s, 5s, 7s
pub const SAMPLE_SRT: &str = "1
00:00:01,000 --> 00:00:02,000
First line.

2
00:00:03,000 --> 00:00:04,000
Second line.

3
00:00:05,000 --> 00:00:06,000
<i>Third</i> line,
split in two.

4
00:00:07,000 --> 00:00:08,000
Fourth line.
";

/// `count` entries of 800 ms, one per second starting at 0
pub fn numbered_entries(count: usize) -> Vec<SubtitleEntry> {
    (0..count)
        .map(|i| {
            let start = i as u64 * 1_000;
            SubtitleEntry::new(i + 1, start, start + 800, format!("Line {}", i + 1))
        })
        .collect()
}

/// SRT text for `numbered_entries(count)`
pub fn numbered_srt(count: usize) -> String {
    loudsub::SubtitleTrack::format(&numbered_entries(count))
}
