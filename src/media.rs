#![forbid(unsafe_code)]

//! Media types and the helpers that pull shortcodes and account handles out
//! of user input.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use url::Url;

use crate::error::ScrapeError;

/// Extension every reel must carry after download.
pub const VIDEO_EXTENSION: &str = "mp4";

static MEDIA_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|/)(?:reels?|tv|p)/([A-Za-z0-9_-]+)/?").expect("valid media id regex")
});

static HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._]+$").expect("valid handle regex"));

/// Path prefixes that mark a post page rather than a profile.
const POST_PREFIXES: [&str; 4] = ["p", "reel", "reels", "tv"];

/// Distinguishes feed posts from reels so files land in the right directory
/// and store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    Post,
    Reel,
}

impl MediaType {
    /// Guesses the type from a post URL: anything under `reel/` or `reels/`
    /// is a reel.
    pub fn from_url(url: &str) -> Self {
        if url.contains("/reel/") || url.contains("/reels/") {
            MediaType::Reel
        } else {
            MediaType::Post
        }
    }

    /// Reels are filtered down to video files; posts keep whatever arrived.
    pub fn expected_extension(self) -> Option<&'static str> {
        match self {
            MediaType::Post => None,
            MediaType::Reel => Some(VIDEO_EXTENSION),
        }
    }

    /// Path segment used by the profile listing URL.
    pub fn listing_slug(self) -> &'static str {
        match self {
            MediaType::Post => "posts",
            MediaType::Reel => "reels",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MediaType::Post => "Post",
            MediaType::Reel => "Reel",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MediaType {
    type Err = ScrapeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "post" | "posts" => Ok(MediaType::Post),
            "reel" | "reels" => Ok(MediaType::Reel),
            _ => Err(ScrapeError::InvalidInput(format!("unknown media type: {value}"))),
        }
    }
}

/// Which candidate sets an account scrape walks through. Posts always run
/// before reels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MediaSelection {
    Post,
    Reel,
    #[default]
    All,
}

impl MediaSelection {
    pub fn types(self) -> &'static [MediaType] {
        match self {
            MediaSelection::Post => &[MediaType::Post],
            MediaSelection::Reel => &[MediaType::Reel],
            MediaSelection::All => &[MediaType::Post, MediaType::Reel],
        }
    }
}

impl FromStr for MediaSelection {
    type Err = ScrapeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" | "both" => Ok(MediaSelection::All),
            other => other.parse::<MediaType>().map(|kind| match kind {
                MediaType::Post => MediaSelection::Post,
                MediaType::Reel => MediaSelection::Reel,
            }),
        }
    }
}

/// One download attempt's worth of identity. Built per item and dropped
/// once the item reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub media_type: MediaType,
    pub source_url: String,
    pub account: Option<String>,
}

impl MediaItem {
    /// Builds an item from a bare post URL, inferring the type from the path.
    pub fn from_url(url: &str) -> Option<Self> {
        let id = extract_media_id(url)?;
        Some(Self {
            id,
            media_type: MediaType::from_url(url),
            source_url: url.to_string(),
            account: None,
        })
    }
}

/// Returns the shortcode following `reel/`, `reels/`, `tv/` or `p/`.
pub fn extract_media_id(url: &str) -> Option<String> {
    MEDIA_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Resolves a handle from either a bare account name or a profile URL.
///
/// Post URLs are rejected because they name an item, not an account. For
/// profile URLs only the first path segment is used, so
/// `https://host/someuser/reels/` still resolves to `someuser`.
pub fn extract_username(input: &str) -> Option<String> {
    let input = input.trim();
    if input.starts_with("http://") || input.starts_with("https://") {
        let parsed = Url::parse(input).ok()?;
        let path = parsed.path().trim_matches('/');
        let first = path.split('/').next().filter(|segment| !segment.is_empty())?;
        if POST_PREFIXES.contains(&first) || !HANDLE_RE.is_match(first) {
            return None;
        }
        return Some(first.to_string());
    }
    if HANDLE_RE.is_match(input) {
        return Some(input.to_string());
    }
    None
}
