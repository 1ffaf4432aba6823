use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use std::path::PathBuf;

use boilerfuel_core::storage::DEFAULT_QUOTA_BYTES;

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8787";

pub struct Config {
    pub store_path: PathBuf,
    pub relay_db_path: PathBuf,
    pub relay_url: String,
    /// `None` disables the storage budget.
    pub storage_quota: Option<usize>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("BOILERFUEL_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("", "", "boilerfuel")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let relay_url =
            std::env::var("BOILERFUEL_RELAY_URL").unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string());
        let storage_quota = parse_quota(std::env::var("BOILERFUEL_STORAGE_QUOTA").ok().as_deref())?;

        Ok(Config {
            store_path: data_dir.join("boilerfuel.db"),
            relay_db_path: data_dir.join("relay.db"),
            relay_url,
            storage_quota,
        })
    }
}

/// Byte budget from the environment: unset means the default, `0` or `off`
/// disables it.
fn parse_quota(raw: Option<&str>) -> Result<Option<usize>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Some(DEFAULT_QUOTA_BYTES)),
        Some("0" | "off" | "none") => Ok(None),
        Some(s) => match s.parse::<usize>() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(_) => bail!("Invalid BOILERFUEL_STORAGE_QUOTA '{s}'. Use a byte count or 'off'"),
        },
    }
}
