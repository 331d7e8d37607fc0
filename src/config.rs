//! Settings file and per-user locations.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RepoResult, RepositoryError};
use crate::models::SortOption;
use crate::scanner::ScanOptions;

pub const APP_DIR_NAME: &str = "Quillpad";
pub const CONFIG_FILE: &str = "config.json";
pub const ROOT_ENV: &str = "QUILLPAD_ROOT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sync folder chosen by the user. `None` uses [`default_root`].
    pub root: Option<PathBuf>,
    pub debounce_ms: u64,
    pub burst_debounce_ms: u64,
    pub preview_chars: usize,
    pub prefix_bytes: usize,
    pub max_header_bytes: usize,
    pub extensions: Vec<String>,
    /// Search index location; derived from the root when unset.
    pub index_dir: Option<PathBuf>,
    pub search_index: bool,
    pub sort: SortOption,
    pub default_notebook: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let scan = ScanOptions::default();
        Config {
            root: None,
            debounce_ms: 500,
            burst_debounce_ms: 2000,
            preview_chars: scan.preview_chars,
            prefix_bytes: scan.prefix_bytes,
            max_header_bytes: scan.max_header_bytes,
            extensions: scan.extensions,
            index_dir: None,
            search_index: true,
            sort: SortOption::default(),
            default_notebook: None,
        }
    }
}

impl Config {
    /// Load from `path`; a missing file gives the defaults.
    pub fn load(path: &Path) -> RepoResult<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<Config>(&content)
                .map_err(|e| RepositoryError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("[config] No config at {:?}, using defaults", path);
                Config::default()
            }
            Err(e) => return Err(RepositoryError::Config(format!("{}: {}", path.display(), e))),
        };

        if let Ok(root) = std::env::var(ROOT_ENV) {
            if !root.trim().is_empty() {
                config.root = Some(PathBuf::from(root));
            }
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> RepoResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        crate::atomic_write_file(path, content.as_bytes()).map_err(RepositoryError::Io)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            extensions: self.extensions.clone(),
            prefix_bytes: self.prefix_bytes,
            max_header_bytes: self.max_header_bytes.max(self.prefix_bytes),
            preview_chars: self.preview_chars,
        }
    }
}

/// Per-user application data directory, never inside a synced folder.
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(local_app_data).join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
            if !data_home.is_empty() {
                return PathBuf::from(data_home).join("quillpad");
            }
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("quillpad");
        }
    }

    std::env::temp_dir().join("quillpad")
}

pub fn default_config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE)
}

/// `~/Documents/Quillpad`, the root used when no sync folder is configured
/// or the configured one is unavailable.
pub fn default_root() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir());
    home.join("Documents").join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("none.json")).unwrap();
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.prefix_bytes, 2048);
        assert_eq!(config.extensions, vec!["md", "txt"]);
    }

    #[test]
    fn test_save_and_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = Config::default();
        config.debounce_ms = 50;
        config.sort = SortOption::TitleAsc;
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.debounce_ms, 50);
        assert_eq!(loaded.sort, SortOption::TitleAsc);

        fs::write(&path, r#"{ "preview_chars": 80 }"#).unwrap();
        let partial = Config::load(&path).unwrap();
        assert_eq!(partial.preview_chars, 80);
        assert_eq!(partial.debounce_ms, 500, "missing keys fall back to defaults");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(RepositoryError::Config(_))));
    }

    #[test]
    fn test_scan_options_keep_header_limit_above_prefix() {
        let config = Config {
            prefix_bytes: 4096,
            max_header_bytes: 1024,
            ..Config::default()
        };
        let scan = config.scan_options();
        assert_eq!(scan.max_header_bytes, 4096);
    }
}
