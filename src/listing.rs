#![forbid(unsafe_code)]

//! Parses the downloader's `--dump-json` output into listing candidates.
//!
//! The dump is usually an array of message tuples (`[2, {meta}]` for a
//! directory, `[3, url, {meta}]` for a file), but older versions emit bare
//! objects or a single top-level object. Every shape is accepted; entries
//! without both `post_url` and `post_shortcode` are dropped, and the first
//! occurrence of each shortcode wins.

use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::error::ScrapeError;

const MESSAGE_DIRECTORY: u64 = 2;
const MESSAGE_URL: u64 = 3;

/// A post or reel found on an account's listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub shortcode: String,
    pub url: String,
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DumpEntry {
    Message(Vec<Value>),
    Object(Map<String, Value>),
    Other(IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DumpOutput {
    Many(Vec<DumpEntry>),
    One(Map<String, Value>),
    Other(IgnoredAny),
}

impl DumpEntry {
    fn metadata(&self) -> Option<&Map<String, Value>> {
        match self {
            DumpEntry::Message(parts) => {
                let kind = parts.first().and_then(Value::as_u64)?;
                let meta = match kind {
                    MESSAGE_DIRECTORY => parts.get(1),
                    MESSAGE_URL => parts.get(2),
                    _ => None,
                }?;
                meta.as_object()
            }
            DumpEntry::Object(map) => Some(map),
            DumpEntry::Other(_) => None,
        }
    }
}

fn candidate_from(meta: &Map<String, Value>) -> Option<Candidate> {
    let non_empty = |key: &str| {
        meta.get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    };
    let url = non_empty("post_url")?;
    let shortcode = non_empty("post_shortcode")?;
    Some(Candidate {
        shortcode: shortcode.to_owned(),
        url: url.to_owned(),
        raw: Value::Object(meta.clone()),
    })
}

/// Parses raw stdout from a listing query.
pub fn parse_listing(stdout: &str) -> Result<Vec<Candidate>, ScrapeError> {
    let output: DumpOutput = serde_json::from_str(stdout)?;
    let metas: Vec<&Map<String, Value>> = match &output {
        DumpOutput::Many(entries) => entries.iter().filter_map(DumpEntry::metadata).collect(),
        DumpOutput::One(map) => vec![map],
        DumpOutput::Other(_) => Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for meta in metas {
        let Some(candidate) = candidate_from(meta) else {
            continue;
        };
        if seen.insert(candidate.shortcode.clone()) {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(code: &str) -> Value {
        json!({
            "post_shortcode": code,
            "post_url": format!("https://www.instagram.com/p/{code}/"),
            "username": "someuser"
        })
    }

    #[test]
    fn reads_message_tuples_and_dedupes() {
        let dump = json!([
            [2, meta("A")],
            [3, "https://cdn.example/a1.jpg", meta("A")],
            [3, "https://cdn.example/b1.jpg", meta("B")],
            [2, meta("C")]
        ]);
        let candidates = parse_listing(&dump.to_string()).unwrap();
        let codes: Vec<&str> = candidates.iter().map(|c| c.shortcode.as_str()).collect();
        assert_eq!(codes, vec!["A", "B", "C"]);
        assert_eq!(candidates[1].url, "https://www.instagram.com/p/B/");
    }

    #[test]
    fn accepts_bare_objects_and_mixed_entries() {
        let dump = json!([
            meta("A"),
            [6, "https://queue.example"],
            "noise",
            42,
            [3, "https://cdn.example/x.mp4"],
            meta("B")
        ]);
        let candidates = parse_listing(&dump.to_string()).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].raw, meta("A"));
    }

    #[test]
    fn accepts_single_top_level_object() {
        let candidates = parse_listing(&meta("ONLY").to_string()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].shortcode, "ONLY");
    }

    #[test]
    fn requires_url_and_post_shortcode() {
        let dump = json!([
            {"post_shortcode": "A"},
            {"post_url": "https://www.instagram.com/p/B/", "shortcode": "B"},
            {"post_url": "", "post_shortcode": "C"},
            meta("D")
        ]);
        let candidates = parse_listing(&dump.to_string()).unwrap();
        let codes: Vec<&str> = candidates.iter().map(|c| c.shortcode.as_str()).collect();
        assert_eq!(codes, vec!["D"]);
    }

    #[test]
    fn unexpected_scalars_yield_nothing() {
        assert!(parse_listing("\"hello\"").unwrap().is_empty());
        assert!(parse_listing("[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = parse_listing("[[2, {").unwrap_err();
        assert!(matches!(err, ScrapeError::Parse(_)));
    }
}
