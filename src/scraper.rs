#![forbid(unsafe_code)]

//! Drives single-URL and whole-account scrapes: list, skip what the ledger
//! already has, download, reconcile, record.
//!
//! Items are processed strictly one after another. A failing item never
//! stops the batch; it only shows up in the report.

use anyhow::Context;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_ITEM_DELAY_SECS, RuntimeConfig};
use crate::downloader::{DownloadRequest, GalleryDl};
use crate::error::ScrapeError;
use crate::layout::{Paths, file_names};
use crate::ledger::Ledger;
use crate::media::{MediaItem, MediaSelection, MediaType, VIDEO_EXTENSION, extract_username};
use crate::range::RangeSpec;
use crate::reconcile::{ReconcileOutcome, discard_sidecars, reconcile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyDownloaded,
}

/// Terminal state of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Skipped(SkipReason),
    DownloadFailed(String),
    Downloaded(ReconcileOutcome),
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub media_id: String,
    pub media_type: MediaType,
    pub url: String,
    pub state: ItemState,
    pub files: Vec<String>,
}

impl ItemReport {
    pub fn is_downloaded(&self) -> bool {
        matches!(self.state, ItemState::Downloaded(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    pub account: Option<String>,
    pub items: Vec<ItemReport>,
    /// Listing queries that failed, per type. The other type still runs.
    pub failed_listings: Vec<(MediaType, String)>,
    /// Post-side video copies removed because the reel side has them.
    pub removed_duplicates: Vec<PathBuf>,
}

impl ScrapeReport {
    pub fn downloaded(&self) -> usize {
        self.items.iter().filter(|item| item.is_downloaded()).count()
    }

    pub fn downloaded_of(&self, media_type: MediaType) -> usize {
        self.items
            .iter()
            .filter(|item| item.media_type == media_type && item.is_downloaded())
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.state, ItemState::Skipped(_)))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|item| matches!(item.state, ItemState::DownloadFailed(_)))
    }

    /// Success count, or `None` when nothing was downloaded.
    pub fn into_count(self) -> Option<usize> {
        match self.downloaded() {
            0 => None,
            count => Some(count),
        }
    }
}

pub struct Scraper {
    paths: Paths,
    tool: GalleryDl,
    ledger: Ledger,
    item_delay: Duration,
    /// Set once a download has run so the delay lands between items only.
    pace: bool,
}

impl Scraper {
    pub fn new(paths: Paths, tool: GalleryDl, ledger: Ledger) -> Self {
        Self {
            paths,
            tool,
            ledger,
            item_delay: Duration::from_secs(DEFAULT_ITEM_DELAY_SECS),
            pace: false,
        }
    }

    /// Resolves the working directory and loads the ledger snapshot for this
    /// run. Nothing is created on disk until a scrape gets past input
    /// validation.
    pub fn from_config(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let paths = Paths::resolve(config.scrape_root.as_deref());
        let ledger = Ledger::load(&paths.ledger)
            .with_context(|| format!("loading ledger {}", paths.ledger.display()))?;
        Ok(Self::new(paths, GalleryDl::from_config(config), ledger).with_item_delay(config.item_delay))
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    fn prepare_layout(&self) -> Result<(), ScrapeError> {
        self.paths
            .prepare()
            .map_err(|err| ScrapeError::Io(std::io::Error::other(format!("{err:#}"))))
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Scrapes one post or reel URL into `Instagram {Type}/<id>/`.
    pub async fn scrape_url(&mut self, url: &str) -> Result<ScrapeReport, ScrapeError> {
        let item = MediaItem::from_url(url)
            .ok_or_else(|| ScrapeError::InvalidInput(format!("no media id in {url}")))?;
        self.tool.ensure_available().await?;
        self.prepare_layout()?;

        let target = self.paths.media_dir(item.media_type).join(&item.id);
        let report = self.process_item(&item, &target).await;
        Ok(ScrapeReport {
            account: None,
            items: vec![report],
            ..ScrapeReport::default()
        })
    }

    /// Scrapes an account's posts and/or reels, then drops post-side videos
    /// that also exist on the reel side.
    ///
    /// `all` overrides `range`. Bad input fails before anything touches the
    /// network or disk.
    pub async fn scrape_account(
        &mut self,
        input: &str,
        selection: MediaSelection,
        range: Option<RangeSpec>,
        all: bool,
    ) -> Result<ScrapeReport, ScrapeError> {
        let account = extract_username(input)
            .ok_or_else(|| ScrapeError::InvalidInput(format!("not an account: {input}")))?;
        self.tool.ensure_available().await?;
        self.prepare_layout()?;

        let range = if all { None } else { range };
        let mut report = ScrapeReport {
            account: Some(account.clone()),
            ..ScrapeReport::default()
        };

        for &media_type in selection.types() {
            let candidates = match self.tool.list_media(&account, media_type).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    error!(account = %account, %media_type, error = %err, "could not list media");
                    report.failed_listings.push((media_type, err.to_string()));
                    continue;
                }
            };
            let candidates = match range {
                Some(range) => {
                    debug!(%range, listed = candidates.len(), "applying range");
                    range.slice(candidates)
                }
                None => candidates,
            };
            info!(account = %account, %media_type, count = candidates.len(), "found candidates");

            let target = self.paths.media_dir(media_type).to_path_buf();
            for candidate in candidates {
                let item = MediaItem {
                    id: candidate.shortcode,
                    media_type,
                    source_url: candidate.url,
                    account: Some(account.clone()),
                };
                report.items.push(self.process_item(&item, &target).await);
            }
        }

        report.removed_duplicates = remove_cross_type_duplicates(&self.paths, &account);
        info!(
            account = %account,
            downloaded = report.downloaded(),
            skipped = report.skipped(),
            removed_duplicates = report.removed_duplicates.len(),
            "account scrape finished"
        );
        Ok(report)
    }

    async fn process_item(&mut self, item: &MediaItem, target_dir: &Path) -> ItemReport {
        let mut report = ItemReport {
            media_id: item.id.clone(),
            media_type: item.media_type,
            url: item.source_url.clone(),
            state: ItemState::Skipped(SkipReason::AlreadyDownloaded),
            files: Vec::new(),
        };
        if self.ledger.contains(&item.id) {
            info!(media_id = %item.id, "already downloaded, skipping");
            return report;
        }

        if self.pace {
            tokio::time::sleep(self.item_delay).await;
        }
        self.pace = true;

        let request = DownloadRequest {
            url: &item.source_url,
            media_id: Some(&item.id),
            target_dir,
            media_type: item.media_type,
            account: item.account.as_deref(),
            expected_extension: item.media_type.expected_extension(),
        };
        info!(media_id = %item.id, media_type = %item.media_type, url = %item.source_url, "downloading");
        let outcome = self.tool.download(&request).await;
        if !outcome.success {
            let discarded = discard_sidecars(&request.output_dir());
            if discarded > 0 {
                warn!(media_id = %item.id, discarded, "dropped sidecars from failed download");
            }
            let reason = match outcome.failure {
                Some(err) => {
                    warn!(media_id = %item.id, retryable = err.is_retryable(), error = %err, "item failed");
                    err.to_string()
                }
                None => "download failed".to_owned(),
            };
            report.state = ItemState::DownloadFailed(reason);
            return report;
        }

        let reconciled = reconcile(
            target_dir,
            item.media_type,
            &item.id,
            &self.paths,
            &self.ledger,
            item.account.as_deref(),
        );
        if !reconciled.is_recorded() {
            warn!(media_id = %item.id, outcome = ?reconciled, "metadata skipped");
        }
        if let Err(err) = self.ledger.record(&item.id) {
            error!(media_id = %item.id, error = %err, "could not record media id");
        }
        report.files = outcome.files;
        report.state = ItemState::Downloaded(reconciled);
        report
    }
}

/// Deletes every video under the account's post directory whose name also
/// exists under its reel directory. Reels own video files.
pub fn remove_cross_type_duplicates(paths: &Paths, account: &str) -> Vec<PathBuf> {
    let post_dir = paths.posts.join(account);
    let reel_dir = paths.reels.join(account);
    let is_video = |name: &String| name.ends_with(&format!(".{VIDEO_EXTENSION}"));

    let reel_videos: HashSet<String> = file_names(&reel_dir).into_iter().filter(is_video).collect();
    if reel_videos.is_empty() {
        return Vec::new();
    }

    let mut removed = Vec::new();
    for name in file_names(&post_dir).into_iter().filter(is_video) {
        if !reel_videos.contains(&name) {
            continue;
        }
        let path = post_dir.join(&name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removed post copy of reel video");
                removed.push(path);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "could not remove duplicate video"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::tests::{fast, install_stub};
    use crate::metadata::CentralizedStore;
    use anyhow::Result;
    use tempfile::{TempDir, tempdir};

    /// Listing mode prints five posts (ignoring `--range`) and no reels.
    /// Download mode writes one media file plus its sidecar, named after the
    /// last URL segment; codes listed in `$FAIL_CODES` fail.
    const ACCOUNT_STUB: &str = r##"
if [[ "$dump" == 1 ]]; then
  if [[ "$*" == *"/posts/"* ]]; then
    printf '['
    sep=""
    for code in A B C D E; do
      printf '%s[2, {"post_shortcode": "%s", "post_url": "https://www.instagram.com/p/%s/", "username": "someuser"}]' "$sep" "$code" "$code"
      sep=","
    done
    printf ']\n'
  else
    echo '[]'
  fi
  exit 0
fi
url="$3"
code="$(basename "$url")"
if [[ -f "$(dirname "$0")/fail_$code" ]]; then
  echo "HTTP 429" >&2
  exit 1
fi
ext="jpg"
if [[ "$url" == *"/reel/"* ]]; then ext="mp4"; fi
mkdir -p "$out"
echo media > "$out/$code.$ext"
echo thumb > "$out/$code.webp"
printf '{"post_shortcode": "%s", "username": "someuser", "description": "line one\\nline two", "likes": 3}\n' "$code" > "$out/$code.$ext.json"
"##;

    fn scraper(temp: &TempDir) -> Result<Scraper> {
        let tool = fast(install_stub(temp.path(), ACCOUNT_STUB)?);
        let paths = Paths::with_base(&temp.path().join("run"));
        let ledger = Ledger::load(&paths.ledger)?;
        Ok(Scraper::new(paths, tool, ledger).with_item_delay(Duration::ZERO))
    }

    fn downloads(temp: &TempDir) -> usize {
        fs::read_to_string(temp.path().join("calls.log"))
            .map(|log| log.lines().filter(|line| !line.contains("--dump-json")).count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn reel_url_is_downloaded_reconciled_and_recorded() -> Result<()> {
        let temp = tempdir()?;
        let mut scraper = scraper(&temp)?;

        let report = scraper
            .scrape_url("https://example.com/reel/ABC123/")
            .await?;
        assert_eq!(report.downloaded(), 1);
        let item = &report.items[0];
        assert_eq!(item.media_type, MediaType::Reel);
        assert_eq!(item.files, vec!["ABC123.mp4"]);
        assert_eq!(
            item.state,
            ItemState::Downloaded(ReconcileOutcome::Recorded {
                csv_written: true,
                json_appended: true
            })
        );

        let paths = scraper.paths().clone();
        let item_dir = paths.reels.join("ABC123");
        assert!(item_dir.join("ABC123.mp4").exists());
        assert!(!item_dir.join("ABC123.webp").exists());
        assert!(!item_dir.join("ABC123.mp4.json").exists());
        assert!(scraper.ledger().contains("ABC123"));
        assert!(Ledger::load(&paths.ledger)?.contains("ABC123"));

        let csv = fs::read_to_string(paths.csv_store(MediaType::Reel))?;
        assert!(csv.starts_with("media_id,username,timestamp,caption,likes,comments,url\n"));
        assert!(csv.contains("ABC123,someuser,,line one line two,3,0,"));
        let store = CentralizedStore::new(
            paths.csv_store(MediaType::Reel),
            paths.json_store(MediaType::Reel),
        );
        assert_eq!(store.load_json().len(), 1);

        let again = scraper
            .scrape_url("https://example.com/reel/ABC123/")
            .await?;
        assert_eq!(
            again.items[0].state,
            ItemState::Skipped(SkipReason::AlreadyDownloaded)
        );
        assert_eq!(again.into_count(), None);
        assert_eq!(downloads(&temp), 1);
        Ok(())
    }

    #[tokio::test]
    async fn url_without_media_id_is_rejected() -> Result<()> {
        let temp = tempdir()?;
        let mut scraper = scraper(&temp)?;
        let err = scraper
            .scrape_url("https://www.instagram.com/someuser/")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidInput(_)));
        assert_eq!(downloads(&temp), 0);
        assert!(!scraper.paths().base.exists());
        Ok(())
    }

    #[tokio::test]
    async fn account_range_is_applied_to_the_listing() -> Result<()> {
        let temp = tempdir()?;
        let mut scraper = scraper(&temp)?;
        let range: RangeSpec = "1-2".parse()?;

        let report = scraper
            .scrape_account("someuser", MediaSelection::All, Some(range), false)
            .await?;
        let ids: Vec<&str> = report.items.iter().map(|i| i.media_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(report.downloaded_of(MediaType::Post), 2);
        assert_eq!(report.account.as_deref(), Some("someuser"));

        let post_dir = scraper.paths().posts.join("someuser");
        assert!(post_dir.join("A.jpg").exists());
        assert!(post_dir.join("B.webp").exists());
        assert!(!post_dir.join("C.jpg").exists());
        assert!(scraper.ledger().contains("B"));
        assert!(!scraper.ledger().contains("C"));
        assert_eq!(report.into_count(), Some(2));

        let calls = fs::read_to_string(temp.path().join("calls.log"))?;
        assert!(calls.contains("--dump-json https://www.instagram.com/someuser/posts/"));
        assert!(calls.contains("--dump-json https://www.instagram.com/someuser/reels/"));
        assert!(!calls.contains("--range"));
        Ok(())
    }

    #[tokio::test]
    async fn range_running_past_the_listing_keeps_only_covered_positions() -> Result<()> {
        let temp = tempdir()?;
        let mut scraper = scraper(&temp)?;
        let range: RangeSpec = "4-7".parse()?;

        let report = scraper
            .scrape_account("someuser", MediaSelection::Post, Some(range), false)
            .await?;
        let ids: Vec<&str> = report.items.iter().map(|i| i.media_id.as_str()).collect();
        assert_eq!(ids, vec!["D", "E"]);
        assert!(!scraper.ledger().contains("A"));
        assert_eq!(downloads(&temp), 2);

        let beyond: RangeSpec = "6-9".parse()?;
        let report = scraper
            .scrape_account("someuser", MediaSelection::Post, Some(beyond), false)
            .await?;
        assert!(report.items.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn all_flag_overrides_range_and_rerun_skips() -> Result<()> {
        let temp = tempdir()?;
        let mut scraper = scraper(&temp)?;
        let range: RangeSpec = "2".parse()?;

        let report = scraper
            .scrape_account(
                "https://www.instagram.com/someuser/",
                MediaSelection::Post,
                Some(range),
                true,
            )
            .await?;
        assert_eq!(report.downloaded(), 5);
        let calls = fs::read_to_string(temp.path().join("calls.log"))?;
        assert!(!calls.contains("--range"));
        assert!(!calls.contains("/reels/"));

        let rerun = scraper
            .scrape_account("someuser", MediaSelection::Post, None, false)
            .await?;
        assert_eq!(rerun.skipped(), 5);
        assert_eq!(rerun.into_count(), None);
        assert_eq!(downloads(&temp), 5);
        Ok(())
    }

    #[tokio::test]
    async fn failed_item_does_not_stop_the_batch() -> Result<()> {
        let temp = tempdir()?;
        fs::write(temp.path().join("fail_B"), "")?;
        let mut scraper = scraper(&temp)?;
        let range: RangeSpec = "1-3".parse()?;

        let report = scraper
            .scrape_account("someuser", MediaSelection::Post, Some(range), false)
            .await?;
        assert_eq!(report.downloaded(), 2);
        let failed: Vec<&str> = report.failures().map(|i| i.media_id.as_str()).collect();
        assert_eq!(failed, vec!["B"]);
        assert!(!scraper.ledger().contains("B"));

        // retried from scratch on the next run, successes stay skipped
        fs::remove_file(temp.path().join("fail_B"))?;
        let rerun = scraper
            .scrape_account("someuser", MediaSelection::Post, Some(range), false)
            .await?;
        assert_eq!(rerun.downloaded(), 1);
        assert_eq!(rerun.skipped(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn bad_handle_is_rejected_before_listing() -> Result<()> {
        let temp = tempdir()?;
        let mut scraper = scraper(&temp)?;
        let err = scraper
            .scrape_account(
                "https://www.instagram.com/p/ABC/",
                MediaSelection::All,
                None,
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidInput(_)));
        assert!(!temp.path().join("calls.log").exists());
        assert!(!scraper.paths().base.exists());
        Ok(())
    }

    #[tokio::test]
    async fn configured_scraper_leaves_disk_alone_on_bad_input() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().join("root");
        let config = RuntimeConfig {
            scrape_root: Some(root.clone()),
            gallery_dl: install_stub(temp.path(), ACCOUNT_STUB)?,
            gallery_dl_config: PathBuf::from("gallery-dl.conf"),
            download_retries: 1,
            retry_delay: Duration::ZERO,
            item_delay: Duration::ZERO,
            download_timeout: Duration::from_secs(10),
            listing_timeout: Duration::from_secs(10),
        };

        let mut scraper = Scraper::from_config(&config)?;
        let err = scraper
            .scrape_account("bad handle!", MediaSelection::All, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidInput(_)));
        assert!(!root.exists());

        scraper.scrape_url("https://example.com/p/OK1/").await?;
        assert!(root.join("Instagram Post").join("OK1").join("OK1.jpg").exists());
        assert!(root.join("CSV_Reels").is_dir());
        Ok(())
    }

    #[tokio::test]
    async fn missing_tool_fails_the_call() -> Result<()> {
        let temp = tempdir()?;
        let paths = Paths::with_base(&temp.path().join("run"));
        let ledger = Ledger::load(&paths.ledger)?;
        let mut scraper = Scraper::new(paths, fast(temp.path().join("nope")), ledger);
        let err = scraper
            .scrape_account("someuser", MediaSelection::All, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::MissingDependency { .. }));
        assert!(!scraper.paths().base.exists());
        Ok(())
    }

    #[test]
    fn post_copies_of_reel_videos_are_removed() -> Result<()> {
        let temp = tempdir()?;
        let paths = Paths::with_base(temp.path());
        let post_dir = paths.posts.join("someuser");
        let reel_dir = paths.reels.join("someuser");
        fs::create_dir_all(&post_dir)?;
        fs::create_dir_all(&reel_dir)?;
        fs::write(post_dir.join("X.mp4"), "v")?;
        fs::write(post_dir.join("Y.mp4"), "v")?;
        fs::write(post_dir.join("X.jpg"), "i")?;
        fs::write(reel_dir.join("X.mp4"), "v")?;
        fs::write(reel_dir.join("X.jpg"), "i")?;

        let removed = remove_cross_type_duplicates(&paths, "someuser");
        assert_eq!(removed, vec![post_dir.join("X.mp4")]);
        assert!(reel_dir.join("X.mp4").exists());
        assert!(post_dir.join("Y.mp4").exists());
        assert!(post_dir.join("X.jpg").exists());
        assert!(remove_cross_type_duplicates(&paths, "nobody").is_empty());
        Ok(())
    }
}
