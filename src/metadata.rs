#![forbid(unsafe_code)]

//! Canonical metadata rows and the centralized CSV/JSON stores they land in.
//!
//! The downloader's sidecars do not follow one schema: depending on the
//! extractor version a caption may live under `description` or `caption`,
//! the author under `owner.username`, `user.username` or `username`, and so
//! on. `Sidecar` reads all known spellings and `MetadataRecord::from_sidecar`
//! picks the first one present.

use anyhow::{Context, Result};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

/// One row of `metadata.csv`. Column order follows field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub media_id: String,
    pub username: String,
    pub timestamp: String,
    pub caption: String,
    pub likes: i64,
    pub comments: i64,
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
struct AccountRef {
    #[serde(default, deserialize_with = "lenient")]
    username: Option<String>,
}

/// Every sidecar field we know how to read. Values with an unexpected JSON
/// type are treated as absent instead of failing the whole parse.
#[derive(Debug, Default, Deserialize)]
pub struct Sidecar {
    #[serde(default, deserialize_with = "lenient")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    caption: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    owner: Option<AccountRef>,
    #[serde(default, deserialize_with = "lenient")]
    user: Option<AccountRef>,
    #[serde(default, deserialize_with = "lenient")]
    username: Option<String>,
    #[serde(default)]
    date: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    like_count: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    likes: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    comment_count: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    comments: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    post_url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    url: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl Sidecar {
    pub fn from_value(raw: &Value) -> serde_json::Result<Self> {
        Sidecar::deserialize(raw)
    }
}

impl MetadataRecord {
    /// Applies the field-name fallback chain. Newlines in the caption become
    /// spaces so each record stays on one CSV line.
    pub fn from_sidecar(media_id: &str, sidecar: &Sidecar) -> Self {
        let caption = sidecar
            .description
            .as_deref()
            .or(sidecar.caption.as_deref())
            .map(strip_newlines)
            .unwrap_or_default();

        let username = sidecar
            .owner
            .as_ref()
            .and_then(|owner| owner.username.clone())
            .or_else(|| sidecar.user.as_ref().and_then(|user| user.username.clone()))
            .or_else(|| sidecar.username.clone())
            .unwrap_or_default();

        let timestamp = match &sidecar.date {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        Self {
            media_id: media_id.to_owned(),
            username,
            timestamp,
            caption,
            likes: sidecar.like_count.or(sidecar.likes).unwrap_or(0),
            comments: sidecar.comment_count.or(sidecar.comments).unwrap_or(0),
            url: sidecar
                .post_url
                .clone()
                .or_else(|| sidecar.url.clone())
                .unwrap_or_default(),
        }
    }
}

fn strip_newlines(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

/// Keys a raw sidecar may carry its shortcode under.
const ID_KEYS: [&str; 3] = ["shortcode", "post_shortcode", "media_id"];

/// Returns the shortcode stored in a raw sidecar object, if any.
pub fn raw_media_id(raw: &Value) -> Option<&str> {
    ID_KEYS
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
}

/// Append-only CSV plus a JSON array that is unique by media id, for one
/// media type.
///
/// The CSV is deliberately not deduplicated: it grows by one row per
/// reconciled item, while the JSON array never holds two entries for the
/// same id.
#[derive(Debug, Clone)]
pub struct CentralizedStore {
    csv_path: PathBuf,
    json_path: PathBuf,
}

impl CentralizedStore {
    pub fn new(csv_path: PathBuf, json_path: PathBuf) -> Self {
        Self {
            csv_path,
            json_path,
        }
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn json_path(&self) -> &Path {
        &self.json_path
    }

    /// Appends one row, writing the header first when the file is new.
    pub fn append_csv(&self, record: &MetadataRecord) -> Result<()> {
        ensure_parent(&self.csv_path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("opening {}", self.csv_path.display()))?;
        let needs_header = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer
            .serialize(record)
            .with_context(|| format!("writing {}", self.csv_path.display()))?;
        writer.flush()?;
        Ok(())
    }

    /// Reads the JSON array. A missing or unreadable file counts as empty.
    pub fn load_json(&self) -> Vec<Value> {
        if !self.json_path.exists() {
            return Vec::new();
        }
        let parsed = File::open(&self.json_path)
            .map_err(anyhow::Error::from)
            .and_then(|file| {
                serde_json::from_reader::<_, Vec<Value>>(BufReader::new(file))
                    .map_err(anyhow::Error::from)
            });
        match parsed {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %self.json_path.display(), error = %err, "could not read JSON store, starting fresh");
                Vec::new()
            }
        }
    }

    /// Adds `raw` unless an entry with `media_id` already exists, then
    /// rewrites the whole array. Returns whether anything was appended.
    ///
    /// Objects that carry no shortcode of their own get a `media_id` key so
    /// later appends can still find them.
    pub fn append_json(&self, media_id: &str, raw: &Value) -> Result<bool> {
        let mut entries = self.load_json();
        if entries
            .iter()
            .any(|entry| raw_media_id(entry) == Some(media_id))
        {
            return Ok(false);
        }
        let mut entry = raw.clone();
        if raw_media_id(&entry).is_none()
            && let Value::Object(map) = &mut entry
        {
            map.insert("media_id".to_owned(), Value::String(media_id.to_owned()));
        }
        entries.push(entry);
        self.write_json(&entries)?;
        Ok(true)
    }

    /// Writes to a sibling temp file and renames it over the store so a
    /// crash never leaves half an array behind.
    fn write_json(&self, entries: &[Value]) -> Result<()> {
        let dir = ensure_parent(&self.json_path)?;
        let tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, entries)
                .with_context(|| format!("serializing {}", self.json_path.display()))?;
            writer.flush()?;
        }
        tmp.persist(&self.json_path)
            .with_context(|| format!("replacing {}", self.json_path.display()))?;
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent).with_context(|| format!("creating {}", parent.display()))?;
    Ok(parent)
}
