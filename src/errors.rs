//! Error normalization for failed downloads
//!
//! Raw executor/tool errors are translated to short human-readable
//! messages before they land on a job record, and classified with a
//! severity used for alerting and triage (never for control flow).

use serde::{Deserialize, Serialize};

/// Downloader-side error patterns and translations.
const DOWNLOADER_ERRORS: &[(&str, &str)] = &[
    (
        "requested format not available",
        "The requested quality is not available for this media. Try a different quality.",
    ),
    (
        "no video formats found",
        "Could not find any downloadable formats for this media.",
    ),
    (
        "unable to download video data",
        "Failed to download media data. The media may be private, deleted, or geoblocked.",
    ),
    ("no such user", "The user or channel does not exist."),
    ("video unavailable", "This media is no longer available."),
    (
        "http error 403",
        "Access denied. The media may be restricted in your region.",
    ),
    ("http error 404", "Media not found (404)."),
    (
        "connection refused",
        "Could not connect to the server. Check your internet connection.",
    ),
    (
        "read timed out",
        "Download took too long. Try again with a smaller file or different quality.",
    ),
    (
        "timeout",
        "Connection timed out. Try again or check your internet speed.",
    ),
    ("invalid url", "The URL is not valid. Please check and try again."),
];

/// Transcoder/filesystem error patterns and translations.
const TRANSCODER_ERRORS: &[(&str, &str)] = &[
    (
        "no such file or directory",
        "The downloaded file could not be processed. Disk space issue?",
    ),
    (
        "permission denied",
        "Permission denied accessing the file. Check disk permissions.",
    ),
    ("disk i/o error", "Disk input/output error. Check your disk health."),
    (
        "out of memory",
        "Ran out of memory during conversion. Close other apps and try again.",
    ),
    (
        "invalid data found",
        "The downloaded file is corrupted. Try downloading again.",
    ),
    (
        "unknown encoder",
        "Audio/video codec not installed. Check the transcoder installation.",
    ),
];

/// Generic error patterns and translations.
const GENERIC_ERRORS: &[(&str, &str)] = &[
    ("connection", "Connection error. Check your internet and try again."),
    ("network", "Network error. Check your internet connection."),
    ("ssl", "SSL/certificate error. Your internet may be blocking the connection."),
    (
        "certificate",
        "Certificate verification failed. Check your network settings.",
    ),
    ("proxy", "Proxy connection error. Check proxy settings."),
];

const MAX_MESSAGE_LEN: usize = 200;

/// Translate a raw error message to human-readable text.
///
/// Known causes map to a fixed message; anything else is truncated and
/// lightly cleaned up.
pub fn normalize_error(raw: &str) -> String {
    if raw.is_empty() {
        return "Unknown error occurred. Please try again.".to_string();
    }

    let lowered = raw.to_lowercase();
    for table in [DOWNLOADER_ERRORS, TRANSCODER_ERRORS, GENERIC_ERRORS] {
        for (pattern, translation) in table {
            if lowered.contains(pattern) {
                return (*translation).to_string();
            }
        }
    }

    // No pattern matched: strip a leading "error:" prefix and tidy up.
    let mut message = match lowered.find("error:") {
        Some(at) => raw[at + "error:".len()..].trim().to_string(),
        None => raw.to_string(),
    };

    if message.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }

    let mut chars = message.chars();
    if let Some(first) = chars.next() {
        if first.is_lowercase() {
            message = first.to_uppercase().collect::<String>() + chars.as_str();
        }
    }

    if message.is_empty() {
        return "An error occurred. Please try again.".to_string();
    }
    if !message.ends_with('.') {
        message.push('.');
    }
    message
}

/// Severity class for alerting and triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

/// Classify an error message.
pub fn error_severity(message: &str) -> Severity {
    let lowered = message.to_lowercase();

    if ["disk", "permission", "out of memory"]
        .iter()
        .any(|word| lowered.contains(word))
    {
        return Severity::Critical;
    }
    if ["network", "connection refused", "timeout", "ssl", "timed out"]
        .iter()
        .any(|word| lowered.contains(word))
    {
        return Severity::High;
    }
    if ["format", "unavailable", "http error", "invalid"]
        .iter()
        .any(|word| lowered.contains(word))
    {
        return Severity::Medium;
    }
    Severity::Low
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_downloader_error() {
        let message = normalize_error("ERROR: Requested format not available for this item");
        assert!(message.contains("requested quality is not available"));
    }

    #[test]
    fn test_known_transcoder_error() {
        let message = normalize_error("av_interleaved_write_frame(): Disk I/O error");
        assert_eq!(message, "Disk input/output error. Check your disk health.");
    }

    #[test]
    fn test_generic_fallback_is_cleaned_up() {
        let message = normalize_error("error: something odd happened");
        assert_eq!(message, "Something odd happened.");
    }

    #[test]
    fn test_long_message_is_truncated() {
        let raw = "x".repeat(500);
        let message = normalize_error(&raw);
        assert!(message.len() <= MAX_MESSAGE_LEN + 1);
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(
            normalize_error(""),
            "Unknown error occurred. Please try again."
        );
    }

    #[test]
    fn test_severity_classes() {
        assert_eq!(error_severity("disk full"), Severity::Critical);
        assert_eq!(error_severity("permission denied"), Severity::Critical);
        assert_eq!(error_severity("network unreachable"), Severity::High);
        assert_eq!(error_severity("Connection timed out."), Severity::High);
        assert_eq!(error_severity("http error 404"), Severity::Medium);
        assert_eq!(error_severity("requested format not available"), Severity::Medium);
        assert_eq!(error_severity("something else"), Severity::Low);
    }
}
