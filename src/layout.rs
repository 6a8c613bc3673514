#![forbid(unsafe_code)]

//! Every filesystem location a scrape run touches, rooted at one working
//! directory.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::media::MediaType;

const POSTS_SUBDIR: &str = "Instagram Post";
const REELS_SUBDIR: &str = "Instagram Reel";
const CSV_POSTS_SUBDIR: &str = "CSV_Posts";
const CSV_REELS_SUBDIR: &str = "CSV_Reels";
const JSON_POSTS_SUBDIR: &str = "Metadata_Post";
const JSON_REELS_SUBDIR: &str = "Metadata_Reels";
const LEDGER_FILE: &str = "media_ids.csv";
const CSV_STORE_FILE: &str = "metadata.csv";
const JSON_STORE_FILE: &str = "metadata.json";

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
    pub posts: PathBuf,
    pub reels: PathBuf,
    pub csv_posts: PathBuf,
    pub csv_reels: PathBuf,
    pub json_posts: PathBuf,
    pub json_reels: PathBuf,
    pub ledger: PathBuf,
}

impl Paths {
    pub fn with_base(base: &Path) -> Self {
        let base = base.to_path_buf();
        Self {
            posts: base.join(POSTS_SUBDIR),
            reels: base.join(REELS_SUBDIR),
            csv_posts: base.join(CSV_POSTS_SUBDIR),
            csv_reels: base.join(CSV_REELS_SUBDIR),
            json_posts: base.join(JSON_POSTS_SUBDIR),
            json_reels: base.join(JSON_REELS_SUBDIR),
            ledger: base.join(LEDGER_FILE),
            base,
        }
    }

    /// Uses the configured root, or a directory named after today's date
    /// (`date=DD-MM-YYYY`) in the current directory.
    pub fn resolve(root: Option<&Path>) -> Self {
        match root {
            Some(root) => Self::with_base(root),
            None => Self::with_base(Path::new(&dated_dir_name(Local::now().date_naive()))),
        }
    }

    /// Creates every directory we might write to so later steps can assume
    /// the tree exists.
    pub fn prepare(&self) -> Result<()> {
        for dir in [
            &self.posts,
            &self.reels,
            &self.csv_posts,
            &self.csv_reels,
            &self.json_posts,
            &self.json_reels,
        ] {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }

    /// Directory the downloader writes into for the given type.
    pub fn media_dir(&self, kind: MediaType) -> &Path {
        match kind {
            MediaType::Post => &self.posts,
            MediaType::Reel => &self.reels,
        }
    }

    pub fn csv_store(&self, kind: MediaType) -> PathBuf {
        match kind {
            MediaType::Post => self.csv_posts.join(CSV_STORE_FILE),
            MediaType::Reel => self.csv_reels.join(CSV_STORE_FILE),
        }
    }

    pub fn json_store(&self, kind: MediaType) -> PathBuf {
        match kind {
            MediaType::Post => self.json_posts.join(JSON_STORE_FILE),
            MediaType::Reel => self.json_reels.join(JSON_STORE_FILE),
        }
    }
}

/// Names of the regular files directly inside `dir`, sorted. A missing
/// directory has no files.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn dated_dir_name(date: NaiveDate) -> String {
    format!("date={}", date.format("%d-%m-%Y"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn prepare_creates_directories() -> Result<()> {
        let dir = tempdir()?;
        let paths = Paths::with_base(dir.path());
        paths.prepare()?;
        assert!(paths.posts.is_dir());
        assert!(paths.reels.is_dir());
        assert!(paths.csv_posts.is_dir());
        assert!(paths.csv_reels.is_dir());
        assert!(paths.json_posts.is_dir());
        assert!(paths.json_reels.is_dir());
        assert!(!paths.ledger.exists());
        Ok(())
    }

    #[test]
    fn stores_are_split_by_type() {
        let paths = Paths::with_base(Path::new("/scrape"));
        assert_eq!(
            paths.csv_store(MediaType::Reel),
            PathBuf::from("/scrape/CSV_Reels/metadata.csv")
        );
        assert_eq!(
            paths.json_store(MediaType::Post),
            PathBuf::from("/scrape/Metadata_Post/metadata.json")
        );
        assert_eq!(
            paths.media_dir(MediaType::Reel),
            Path::new("/scrape/Instagram Reel")
        );
        assert_eq!(paths.ledger, PathBuf::from("/scrape/media_ids.csv"));
    }

    #[test]
    fn dated_name_uses_day_month_year() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(dated_dir_name(date), "date=07-03-2024");
    }

    #[test]
    fn file_names_skips_directories() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("b.mp4"), "v")?;
        fs::write(dir.path().join("a.json"), "{}")?;
        fs::create_dir(dir.path().join("nested"))?;
        fs::write(dir.path().join("nested").join("c.jpg"), "i")?;
        assert_eq!(file_names(dir.path()), vec!["a.json", "b.mp4"]);
        assert!(file_names(&dir.path().join("missing")).is_empty());
        Ok(())
    }

    #[test]
    fn explicit_root_wins() {
        let paths = Paths::resolve(Some(Path::new("/tmp/run")));
        assert_eq!(paths.base, PathBuf::from("/tmp/run"));
    }
}
