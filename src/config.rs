//! Persistent configuration model and defaults.

use std::path::{Path, PathBuf};

use log::{info, warn};

pub const CONFIG_FILE_NAME: &str = "voicebank.toml";

/// Root configuration persisted to `voicebank.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Where clips, portraits, and catalog snapshots live.
    pub storage: StorageConfig,
    #[serde(default)]
    /// Language priority and download preferences.
    pub voice: VoiceConfig,
    #[serde(default)]
    /// Upstream endpoints, timeouts, and retry policy.
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct VoiceConfig {
    /// Rank digits in lookup order (1 方言, 2 中文, 3 日语, 4 英语, 5 韩语, 6 意语).
    #[serde(default = "default_language_priority")]
    pub language_priority: String,
    /// Rank digits of the languages the downloader may fetch.
    #[serde(default = "default_download_languages")]
    pub download_languages: String,
    #[serde(default = "default_true")]
    pub auto_download: bool,
    #[serde(default)]
    pub auto_download_skin: bool,
    /// Lookups reuse the in-memory catalog for this long before rescanning.
    #[serde(default = "default_catalog_refresh_secs")]
    pub catalog_refresh_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_wiki_base_url")]
    pub wiki_base_url: String,
    #[serde(default = "default_asset_base_url")]
    pub asset_base_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Attempts per request, counting the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Highest numeric clip slot probed per language.
    #[serde(default = "default_max_file_index")]
    pub max_file_index: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language_priority: default_language_priority(),
            download_languages: default_download_languages(),
            auto_download: true,
            auto_download_skin: false,
            catalog_refresh_secs: default_catalog_refresh_secs(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wiki_base_url: default_wiki_base_url(),
            asset_base_url: default_asset_base_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            requests_per_second: default_requests_per_second(),
            max_file_index: default_max_file_index(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("voicebank")
}

fn default_language_priority() -> String {
    "123456".to_string()
}

fn default_download_languages() -> String {
    "123".to_string()
}

fn default_catalog_refresh_secs() -> u64 {
    30
}

fn default_wiki_base_url() -> String {
    "https://prts.wiki".to_string()
}

fn default_asset_base_url() -> String {
    "https://torappu.prts.wiki/assets/audio".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_requests_per_second() -> u32 {
    8
}

fn default_max_file_index() -> u32 {
    50
}

fn digits_only(value: &str, fallback: fn() -> String) -> String {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        fallback()
    } else {
        digits
    }
}

fn trim_base_url(value: &str, fallback: fn() -> String) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

/// Clamps values into their supported ranges.
pub fn sanitize_config(config: Config) -> Config {
    Config {
        storage: config.storage,
        voice: VoiceConfig {
            language_priority: digits_only(
                &config.voice.language_priority,
                default_language_priority,
            ),
            download_languages: digits_only(
                &config.voice.download_languages,
                default_download_languages,
            ),
            auto_download: config.voice.auto_download,
            auto_download_skin: config.voice.auto_download_skin,
            catalog_refresh_secs: config.voice.catalog_refresh_secs.min(24 * 60 * 60),
        },
        network: NetworkConfig {
            wiki_base_url: trim_base_url(&config.network.wiki_base_url, default_wiki_base_url),
            asset_base_url: trim_base_url(
                &config.network.asset_base_url,
                default_asset_base_url,
            ),
            connect_timeout_ms: config.network.connect_timeout_ms.clamp(500, 60_000),
            read_timeout_ms: config.network.read_timeout_ms.clamp(500, 120_000),
            max_attempts: config.network.max_attempts.clamp(1, 5),
            retry_delay_ms: config.network.retry_delay_ms.min(10_000),
            requests_per_second: config.network.requests_per_second.max(1),
            max_file_index: config.network.max_file_index.clamp(1, 200),
        },
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Loads `path`, writing defaults first when the file does not exist.
///
/// Unreadable or unparsable files fall back to defaults.
pub fn load_or_create(path: &Path) -> Config {
    if !path.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        let written = toml::to_string(&default_config)
            .map_err(|err| err.to_string())
            .and_then(|content| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|err| err.to_string())?;
                }
                std::fs::write(path, content).map_err(|err| err.to_string())
            });
        if let Err(err) = written {
            warn!("Failed to write default config {}: {}", path.display(), err);
        }
        return sanitize_config(default_config);
    }

    let parsed = std::fs::read_to_string(path)
        .map_err(|err| err.to_string())
        .and_then(|content| toml::from_str::<Config>(&content).map_err(|err| err.to_string()));
    match parsed {
        Ok(config) => sanitize_config(config),
        Err(err) => {
            warn!(
                "Failed to load config {}; using defaults: {}",
                path.display(),
                err
            );
            sanitize_config(Config::default())
        }
    }
}
