#![forbid(unsafe_code)]

//! Durable set of media ids that have already been downloaded.
//!
//! The file is a single-column CSV with a `media_id` header. Each run loads a
//! fresh snapshot at startup and appends as it goes. There is no
//! cross-process locking, so two runs against the same directory can race.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    media_id: String,
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    ids: HashSet<String>,
}

impl Ledger {
    /// Reads every persisted id. A missing or empty file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        let ids = read_ids(path)?;
        debug!(path = %path.display(), count = ids.len(), "loaded ledger");
        Ok(Self {
            path: path.to_path_buf(),
            ids,
        })
    }

    pub fn contains(&self, media_id: &str) -> bool {
        self.ids.contains(media_id)
    }

    /// Appends `media_id` unless it is already present. Returns whether a row
    /// was written.
    pub fn record(&mut self, media_id: &str) -> Result<bool> {
        if self.ids.contains(media_id) {
            return Ok(false);
        }
        append_id(&self.path, media_id)?;
        self.ids.insert(media_id.to_owned());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_ids(path: &Path) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    if !path.exists() {
        return Ok(ids);
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening ledger {}", path.display()))?;
    for row in reader.deserialize::<LedgerRow>() {
        let row = row.with_context(|| format!("reading ledger {}", path.display()))?;
        let id = row.media_id.trim();
        if !id.is_empty() {
            ids.insert(id.to_owned());
        }
    }
    Ok(ids)
}

fn append_id(path: &Path, media_id: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening ledger {}", path.display()))?;
    let needs_header = file.metadata()?.len() == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    writer
        .serialize(LedgerRow {
            media_id: media_id.to_owned(),
        })
        .with_context(|| format!("writing ledger entry for {media_id}"))?;
    writer.flush()?;
    Ok(())
}
