/*!
 * Tests for error types and conversions
 */

use std::path::PathBuf;
use loudsub::errors::{AppError, FilterError, SubtitleError, ToolError};

#[test]
fn test_subtitleError_format_shouldDisplayInput() {
    let error = SubtitleError::Format("99:xx".to_string());
    assert_eq!(error.to_string(), "Invalid timestamp format: 99:xx");
}

#[test]
fn test_toolError_unavailable_shouldListSearchedLocations() {
    let error = ToolError::Unavailable {
        name: "ffmpeg".to_string(),
        searched: "PATH, /usr/bin/ffmpeg".to_string(),
    };
    let display = error.to_string();
    assert!(display.contains("ffmpeg"));
    assert!(display.contains("/usr/bin/ffmpeg"));
}

#[test]
fn test_filterError_invalidSpan_shouldDisplayEntryAndTimes() {
    let error = FilterError::InvalidSpan { index: 7, start_ms: 5_000, end_ms: 4_000 };
    let display = error.to_string();
    assert!(display.contains("entry 7"));
    assert!(display.contains("5000"));
    assert!(display.contains("4000"));
}

#[test]
fn test_filterError_fromToolError_shouldWrapAsUnavailable() {
    let tool = ToolError::Launch {
        path: PathBuf::from("/usr/bin/ffmpeg"),
        message: "permission denied".to_string(),
    };
    let error: FilterError = tool.into();
    assert!(matches!(error, FilterError::ToolUnavailable(ToolError::Launch { .. })));
    assert!(error.to_string().contains("permission denied"));
}

#[test]
fn test_appError_conversions_shouldPickVariant() {
    let from_filter: AppError = FilterError::MissingMedia(PathBuf::from("a.wav")).into();
    assert!(matches!(from_filter, AppError::Filter(_)));

    let from_io: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(from_io, AppError::File(_)));

    let from_anyhow: AppError = anyhow::anyhow!("boom").into();
    assert!(matches!(from_anyhow, AppError::Unknown(ref m) if m == "boom"));

    let from_subtitle: AppError = SubtitleError::Format("x".to_string()).into();
    assert!(from_subtitle.to_string().starts_with("Subtitle error"));
}
