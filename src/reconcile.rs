#![forbid(unsafe_code)]

//! Folds the downloader's per-item sidecar into the centralized stores and
//! removes it afterwards.

use serde_json::Value;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::layout::{Paths, file_names};
use crate::ledger::Ledger;
use crate::media::MediaType;
use crate::metadata::{CentralizedStore, MetadataRecord, Sidecar};

/// Name of the store file, which must never be mistaken for a sidecar.
const STORE_FILE_NAME: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The id is already in the ledger; nothing was touched.
    AlreadyRecorded,
    NoSidecar,
    /// The sidecar could not be parsed and was left in place.
    Unreadable { sidecar: PathBuf },
    /// Both store steps were attempted; each flag says whether it wrote.
    Recorded { csv_written: bool, json_appended: bool },
}

impl ReconcileOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, ReconcileOutcome::Recorded { .. })
    }
}

pub fn is_sidecar(file_name: &str) -> bool {
    file_name.ends_with(".json") && file_name != STORE_FILE_NAME
}

/// Sidecar files directly inside `dir`, sorted by name.
pub fn sidecar_files(dir: &Path) -> Vec<PathBuf> {
    file_names(dir)
        .into_iter()
        .filter(|name| is_sidecar(name))
        .map(|name| dir.join(name))
        .collect()
}

/// Reconciles the sidecar for `media_id` found in `output_dir` (nested under
/// `account` when given).
///
/// Idempotent per id: ids already in the ledger are skipped. The CSV and
/// JSON steps are independent; a failure in one is logged and does not stop
/// the other. Sidecars are deleted once parsed, whatever the store steps did.
pub fn reconcile(
    output_dir: &Path,
    media_type: MediaType,
    media_id: &str,
    paths: &Paths,
    ledger: &Ledger,
    account: Option<&str>,
) -> ReconcileOutcome {
    if ledger.contains(media_id) {
        info!(media_id, "already processed, skipping metadata");
        return ReconcileOutcome::AlreadyRecorded;
    }

    let dir = match account {
        Some(account) => output_dir.join(account),
        None => output_dir.to_path_buf(),
    };
    let sidecars = sidecar_files(&dir);
    let Some(sidecar_path) = sidecars.first() else {
        warn!(media_id, dir = %dir.display(), "no metadata sidecar found");
        return ReconcileOutcome::NoSidecar;
    };

    let raw = match read_sidecar(sidecar_path) {
        Ok(raw) => raw,
        Err(err) => {
            error!(media_id, path = %sidecar_path.display(), error = %err, "could not read metadata sidecar");
            return ReconcileOutcome::Unreadable {
                sidecar: sidecar_path.clone(),
            };
        }
    };
    let sidecar = match Sidecar::from_value(&raw) {
        Ok(sidecar) => sidecar,
        Err(err) => {
            error!(media_id, path = %sidecar_path.display(), error = %err, "metadata sidecar is not an object");
            return ReconcileOutcome::Unreadable {
                sidecar: sidecar_path.clone(),
            };
        }
    };

    let record = MetadataRecord::from_sidecar(media_id, &sidecar);
    let store = CentralizedStore::new(paths.csv_store(media_type), paths.json_store(media_type));

    let csv_written = match store.append_csv(&record) {
        Ok(()) => true,
        Err(err) => {
            error!(media_id, path = %store.csv_path().display(), error = %err, "could not append CSV row");
            false
        }
    };
    let json_appended = match store.append_json(media_id, &raw) {
        Ok(appended) => appended,
        Err(err) => {
            error!(media_id, path = %store.json_path().display(), error = %err, "could not update JSON store");
            false
        }
    };

    remove_files(&sidecars);
    info!(media_id, %media_type, csv_written, json_appended, "metadata reconciled");

    ReconcileOutcome::Recorded {
        csv_written,
        json_appended,
    }
}

/// Deletes any sidecars left in `dir` without recording them. Used after a
/// failed download so a stale sidecar is never attributed to the next item.
pub fn discard_sidecars(dir: &Path) -> usize {
    let sidecars = sidecar_files(dir);
    remove_files(&sidecars)
}

fn read_sidecar(path: &Path) -> anyhow::Result<Value> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn remove_files(files: &[PathBuf]) -> usize {
    let mut removed = 0;
    for file in files {
        match fs::remove_file(file) {
            Ok(()) => removed += 1,
            Err(err) => {
                warn!(path = %file.display(), error = %err, "could not delete sidecar");
            }
        }
    }
    removed
}
