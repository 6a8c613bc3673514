#![forbid(unsafe_code)]

//! Archives Instagram posts and reels through `gallery-dl`, keeping a ledger
//! of finished items and per-type CSV/JSON metadata stores.

pub mod config;
pub mod downloader;
pub mod error;
pub mod layout;
pub mod ledger;
pub mod listing;
pub mod media;
pub mod metadata;
pub mod range;
pub mod reconcile;
pub mod scraper;

pub use error::ScrapeError;
pub use media::{MediaSelection, MediaType};
pub use range::RangeSpec;
pub use scraper::{ScrapeReport, Scraper};
