#![forbid(unsafe_code)]

//! Thin adapter around the external `gallery-dl` binary.
//!
//! Every invocation passes the fixed configuration file and is bounded by a
//! timeout. Downloads are retried a fixed number of times with a fixed delay;
//! listing queries are not retried.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::{
    DEFAULT_DOWNLOAD_RETRIES, DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_LISTING_TIMEOUT_SECS,
    DEFAULT_RETRY_DELAY_SECS, RuntimeConfig,
};
use crate::error::ScrapeError;
use crate::layout::file_names;
use crate::listing::{Candidate, parse_listing};
use crate::media::{MediaType, VIDEO_EXTENSION};

const PROFILE_BASE_URL: &str = "https://www.instagram.com";

/// What to fetch and where to put it.
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    pub url: &'a str,
    /// Lets files already on disk from an earlier run count for this item.
    pub media_id: Option<&'a str>,
    pub target_dir: &'a Path,
    pub media_type: MediaType,
    /// Nests the output under `target_dir/<account>`.
    pub account: Option<&'a str>,
    pub expected_extension: Option<&'a str>,
}

impl DownloadRequest<'_> {
    pub fn output_dir(&self) -> PathBuf {
        match self.account {
            Some(account) => self.target_dir.join(account),
            None => self.target_dir.to_path_buf(),
        }
    }
}

/// Result of one `download` call. Never an error: failures are folded into
/// `success == false` plus the reason.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub success: bool,
    pub files: Vec<String>,
    pub failure: Option<ScrapeError>,
}

impl DownloadOutcome {
    fn succeeded(files: Vec<String>) -> Self {
        Self {
            success: true,
            files,
            failure: None,
        }
    }

    fn failed(err: ScrapeError) -> Self {
        Self {
            success: false,
            files: Vec::new(),
            failure: Some(err),
        }
    }
}

#[derive(Debug)]
enum RunError {
    Timeout(Duration),
    Spawn(std::io::Error),
}

#[derive(Debug, Clone)]
pub struct GalleryDl {
    program: PathBuf,
    config_file: PathBuf,
    retries: u32,
    retry_delay: Duration,
    download_timeout: Duration,
    listing_timeout: Duration,
}

impl GalleryDl {
    pub fn new(program: impl Into<PathBuf>, config_file: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_file: config_file.into(),
            retries: DEFAULT_DOWNLOAD_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            listing_timeout: Duration::from_secs(DEFAULT_LISTING_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(&config.gallery_dl, &config.gallery_dl_config)
            .with_retries(config.download_retries, config.retry_delay)
            .with_timeouts(config.download_timeout, config.listing_timeout)
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn with_timeouts(mut self, download: Duration, listing: Duration) -> Self {
        self.download_timeout = download;
        self.listing_timeout = listing;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--config")
            .arg(&self.config_file)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    async fn run(mut command: Command, timeout: Duration) -> Result<Output, RunError> {
        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(RunError::Spawn(err)),
            Err(_) => Err(RunError::Timeout(timeout)),
        }
    }

    /// Runs `<program> --version` so a missing install fails loudly and
    /// up front.
    pub async fn ensure_available(&self) -> Result<(), ScrapeError> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        let program = self.program.display().to_string();
        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(ScrapeError::MissingDependency {
                program,
                reason: format!("--version exited with {status}"),
            }),
            Err(err) => Err(ScrapeError::MissingDependency {
                program,
                reason: err.to_string(),
            }),
        }
    }

    /// Downloads one item, retrying transient failures, then validates what
    /// landed on disk.
    pub async fn download(&self, request: &DownloadRequest<'_>) -> DownloadOutcome {
        if let Err(err) = self.ensure_available().await {
            error!(error = %err, "downloader unavailable");
            return DownloadOutcome::failed(err);
        }

        let output_dir = request.output_dir();
        if let Err(err) = fs::create_dir_all(&output_dir) {
            error!(dir = %output_dir.display(), error = %err, "could not create output directory");
            return DownloadOutcome::failed(err.into());
        }
        let existing: HashSet<String> = file_names(&output_dir).into_iter().collect();

        let mut last_error = String::new();
        for attempt in 1..=self.retries {
            let mut command = self.command();
            command
                .arg(request.url)
                .arg("-D")
                .arg(&output_dir)
                .arg("--write-metadata");
            if let (MediaType::Reel, Some(ext)) = (request.media_type, request.expected_extension) {
                command.arg("--filter").arg(format!("extension == '{ext}'"));
            }

            match Self::run(command, self.download_timeout).await {
                Ok(output) if output.status.success() => {
                    debug!(
                        url = request.url,
                        stdout = %String::from_utf8_lossy(&output.stdout).trim(),
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "gallery-dl finished"
                    );
                    return match validate_files(&output_dir, &existing, request) {
                        Ok(files) => DownloadOutcome::succeeded(files),
                        Err(err) => {
                            warn!(url = request.url, error = %err, "download produced no usable files");
                            DownloadOutcome::failed(err)
                        }
                    };
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    last_error = format!("{}: {}", output.status, stderr.trim());
                    warn!(
                        url = request.url,
                        media_type = %request.media_type,
                        attempt,
                        retries = self.retries,
                        stderr = %stderr.trim(),
                        "gallery-dl exited with failure"
                    );
                }
                Err(RunError::Timeout(limit)) => {
                    last_error = format!("timed out after {}s", limit.as_secs());
                    warn!(url = request.url, attempt, retries = self.retries, "gallery-dl timed out");
                }
                Err(RunError::Spawn(err)) => {
                    last_error = err.to_string();
                    warn!(url = request.url, attempt, retries = self.retries, error = %err, "could not run gallery-dl");
                }
            }

            if attempt < self.retries {
                info!(delay_secs = self.retry_delay.as_secs(), "retrying download");
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        let err = ScrapeError::Transient {
            attempts: self.retries,
            message: last_error,
        };
        error!(url = request.url, media_type = %request.media_type, error = %err, "download failed");
        DownloadOutcome::failed(err)
    }

    /// Lists every post or reel of an account without downloading anything.
    ///
    /// Positions are not filtered here; callers slice the returned list.
    /// Timeouts are terminal.
    pub async fn list_media(
        &self,
        account: &str,
        media_type: MediaType,
    ) -> Result<Vec<Candidate>, ScrapeError> {
        let url = listing_url(account, media_type);
        let mut command = self.command();
        command.arg("--dump-json").arg(&url);

        let output = match Self::run(command, self.listing_timeout).await {
            Ok(output) => output,
            Err(RunError::Timeout(limit)) => {
                return Err(ScrapeError::Listing(format!(
                    "timed out after {}s fetching {url}",
                    limit.as_secs()
                )));
            }
            Err(RunError::Spawn(err)) => {
                return Err(ScrapeError::Listing(format!("could not run gallery-dl: {err}")));
            }
        };
        if !output.status.success() {
            return Err(ScrapeError::Listing(format!(
                "{url} ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let candidates = parse_listing(&stdout)?;
        debug!(%url, count = candidates.len(), "listing parsed");
        Ok(candidates)
    }
}

pub fn listing_url(account: &str, media_type: MediaType) -> String {
    format!("{PROFILE_BASE_URL}/{account}/{}/", media_type.listing_slug())
}

fn is_media_file(name: &str) -> bool {
    !name.ends_with(".json") && !name.ends_with(".part")
}

fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|value| value.to_str())
        .is_some_and(|value| value.eq_ignore_ascii_case(ext))
}

/// Lists the media files this run added to `dir`. Reels keep only the
/// expected video extension and the other new files are deleted; posts keep
/// everything. When the tool added nothing, files from an earlier run whose
/// name carries the media id are reported instead. Fails when nothing usable
/// is left.
fn validate_files(
    dir: &Path,
    existing: &HashSet<String>,
    request: &DownloadRequest<'_>,
) -> Result<Vec<String>, ScrapeError> {
    let media_type = request.media_type;
    let expected_extension = request.expected_extension;
    let media: Vec<String> = file_names(dir)
        .into_iter()
        .filter(|name| is_media_file(name))
        .collect();
    let (earlier, added): (Vec<String>, Vec<String>) =
        media.into_iter().partition(|name| existing.contains(name));
    let files = match (added.is_empty(), request.media_id) {
        (true, Some(id)) => earlier
            .into_iter()
            .filter(|name| name.contains(id))
            .collect(),
        _ => added,
    };

    let valid = match media_type {
        MediaType::Post => files,
        MediaType::Reel => {
            let ext = expected_extension.unwrap_or(VIDEO_EXTENSION);
            let (keep, reject): (Vec<String>, Vec<String>) =
                files.into_iter().partition(|name| has_extension(name, ext));
            for name in reject {
                let path = dir.join(&name);
                match fs::remove_file(&path) {
                    Ok(()) => info!(path = %path.display(), "removed file with unexpected type"),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "could not remove file with unexpected type")
                    }
                }
            }
            keep
        }
    };

    if valid.is_empty() {
        return Err(ScrapeError::ContentMismatch {
            expected: expected_extension
                .map(str::to_owned)
                .unwrap_or_else(|| media_type.label().to_ascii_lowercase()),
            dir: dir.display().to_string(),
        });
    }
    Ok(valid)
}
