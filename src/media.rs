//! Media types.
//!
//! Only what the pipeline needs: parsing a `type/subtype; params` string,
//! deciding whether a response is JSON (for stream framing), and guessing a
//! type from a file extension (for attachments).

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::PipelineError;

/// A media type such as `application/json; charset=utf-8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    value: Cow<'static, str>,
}

impl MediaType {
    pub const JSON: MediaType = MediaType::from_static("application/json");
    pub const TEXT: MediaType = MediaType::from_static("text/plain");
    pub const HTML: MediaType = MediaType::from_static("text/html");
    pub const OCTET_STREAM: MediaType = MediaType::from_static("application/octet-stream");
    pub const MSGPACK: MediaType = MediaType::from_static("application/msgpack");
    pub const EVENT_STREAM: MediaType = MediaType::from_static("text/event-stream");
    pub const NDJSON: MediaType = MediaType::from_static("application/x-ndjson");

    /// Create from a static string (no validation).
    pub const fn from_static(value: &'static str) -> Self {
        Self {
            value: Cow::Borrowed(value),
        }
    }

    /// Parse a media type, rejecting values without a `/`.
    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        let trimmed = value.trim();
        let essence = trimmed.split(';').next().unwrap_or("").trim();
        match essence.split_once('/') {
            Some((t, s)) if !t.is_empty() && !s.is_empty() => Ok(Self {
                value: Cow::Owned(trimmed.to_string()),
            }),
            _ => Err(PipelineError::status(
                415,
                format!("invalid media type: {value}"),
            )),
        }
    }

    /// Full value including parameters.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// `type/subtype` without parameters.
    pub fn essence(&self) -> &str {
        self.value.split(';').next().unwrap_or("").trim()
    }

    /// Value of a parameter such as `charset`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.value.split(';').skip(1).find_map(|p| {
            let (k, v) = p.split_once('=')?;
            k.trim()
                .eq_ignore_ascii_case(name)
                .then(|| v.trim().trim_matches('"'))
        })
    }

    /// True for `application/json` and any `+json` structured suffix.
    pub fn is_json(&self) -> bool {
        let essence = self.essence();
        essence.eq_ignore_ascii_case("application/json")
            || essence
                .rsplit_once('+')
                .is_some_and(|(_, suffix)| suffix.eq_ignore_ascii_case("json"))
    }

    pub fn is_text(&self) -> bool {
        self.essence()
            .get(..5)
            .is_some_and(|p| p.eq_ignore_ascii_case("text/"))
    }

    /// Guess a media type from a file extension, defaulting to
    /// `application/octet-stream`.
    pub fn for_path(path: &Path) -> MediaType {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => MediaType::JSON,
            Some("txt") | Some("log") => MediaType::TEXT,
            Some("html") | Some("htm") => MediaType::HTML,
            Some("css") => MediaType::from_static("text/css"),
            Some("js") | Some("mjs") => MediaType::from_static("text/javascript"),
            Some("csv") => MediaType::from_static("text/csv"),
            Some("xml") => MediaType::from_static("application/xml"),
            Some("pdf") => MediaType::from_static("application/pdf"),
            Some("zip") => MediaType::from_static("application/zip"),
            Some("png") => MediaType::from_static("image/png"),
            Some("jpg") | Some("jpeg") => MediaType::from_static("image/jpeg"),
            Some("gif") => MediaType::from_static("image/gif"),
            Some("svg") => MediaType::from_static("image/svg+xml"),
            Some("msgpack") => MediaType::MSGPACK,
            _ => MediaType::OCTET_STREAM,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for MediaType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaType::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_detection() {
        assert!(MediaType::JSON.is_json());
        assert!(MediaType::parse("application/json; charset=utf-8")
            .unwrap()
            .is_json());
        assert!(MediaType::parse("application/problem+json")
            .unwrap()
            .is_json());
        assert!(!MediaType::TEXT.is_json());
        assert!(!MediaType::NDJSON.is_json());
    }

    #[test]
    fn test_essence_and_params() {
        let mt = MediaType::parse("text/plain; charset=\"utf-8\"").unwrap();
        assert_eq!(mt.essence(), "text/plain");
        assert_eq!(mt.param("charset"), Some("utf-8"));
        assert_eq!(mt.param("boundary"), None);
        assert!(mt.is_text());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MediaType::parse("json").is_err());
        assert!(MediaType::parse("/json").is_err());
        assert!("application/json".parse::<MediaType>().is_ok());
    }

    #[test]
    fn test_for_path() {
        assert_eq!(MediaType::for_path(Path::new("a/report.PDF")).essence(), "application/pdf");
        assert_eq!(MediaType::for_path(Path::new("data.json")), MediaType::JSON);
        assert_eq!(MediaType::for_path(Path::new("noext")), MediaType::OCTET_STREAM);
    }
}
