#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_GALLERY_DL_BIN: &str = "gallery-dl";
pub const DEFAULT_GALLERY_DL_CONFIG: &str = "gallery-dl.conf";
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_ITEM_DELAY_SECS: u64 = 2;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_LISTING_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `None` means "use today's dated directory".
    pub scrape_root: Option<PathBuf>,
    pub gallery_dl: PathBuf,
    pub gallery_dl_config: PathBuf,
    pub download_retries: u32,
    pub retry_delay: Duration,
    pub item_delay: Duration,
    pub download_timeout: Duration,
    pub listing_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub scrape_root: Option<PathBuf>,
    pub gallery_dl: Option<PathBuf>,
    pub gallery_dl_config: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_config_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeConfig {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeConfig {
    let scrape_root = overrides
        .scrape_root
        .or_else(|| lookup_value("SCRAPE_ROOT", file_vars, &env_lookup).map(PathBuf::from));
    let gallery_dl = overrides
        .gallery_dl
        .or_else(|| lookup_value("GALLERY_DL_BIN", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_GALLERY_DL_BIN));
    let gallery_dl_config = overrides
        .gallery_dl_config
        .or_else(|| lookup_value("GALLERY_DL_CONFIG", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_GALLERY_DL_CONFIG));
    let download_retries = lookup_value("DOWNLOAD_RETRIES", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(DEFAULT_DOWNLOAD_RETRIES)
        .max(1);
    let secs = |key: &str, default: u64| {
        Duration::from_secs(
            lookup_value(key, file_vars, &env_lookup)
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(default),
        )
    };

    RuntimeConfig {
        scrape_root,
        gallery_dl,
        gallery_dl_config,
        download_retries,
        retry_delay: secs("RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS),
        item_delay: secs("ITEM_DELAY_SECS", DEFAULT_ITEM_DELAY_SECS),
        download_timeout: secs("DOWNLOAD_TIMEOUT_SECS", DEFAULT_DOWNLOAD_TIMEOUT_SECS),
        listing_timeout: secs("LISTING_TIMEOUT_SECS", DEFAULT_LISTING_TIMEOUT_SECS),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

/// Reads `KEY=value` pairs, tolerating `export` prefixes, quotes, comments,
/// and a missing file.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
