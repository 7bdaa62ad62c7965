use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::{info, warn};

use crate::discord::rest::DEFAULT_API_BASE;
use crate::engine::PreviewLimits;

/// Channels scanned for zero-message members when neither the request nor
/// `targetChannels.json` names any.
pub const FALLBACK_TARGET_CHANNELS: &[&str] = &[
    "in-between",
    "general",
    "ccp-discussion",
    "legit-and-price-check",
];

/// Top-level configuration, loaded from guild-sweeper.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SweeperConfig {
    pub server: ServerSection,
    pub discord: DiscordSection,
    pub storage: StorageSection,
    pub scan: ScanSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Directory holding the dashboard; unmatched routes serve its index.html.
    pub static_dir: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:3000".into(),
            static_dir: "public".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscordSection {
    pub token: String,
    pub guild_id: String,
    pub api_base: String,
    /// Outbound request burst before pacing kicks in.
    pub burst: u32,
    /// Milliseconds to refill one request token.
    pub refill_ms: u64,
}

impl Default for DiscordSection {
    fn default() -> Self {
        Self {
            token: String::new(),
            guild_id: String::new(),
            api_base: DEFAULT_API_BASE.into(),
            burst: 50,
            refill_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub csv_dir: String,
    pub ignore_dir: String,
    pub config_dir: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            csv_dir: "csv".into(),
            ignore_dir: "ignore".into(),
            config_dir: "config".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub default_inactive_days: i64,
    pub include_threads: bool,
    pub zero_preview_limit: usize,
    pub zero_skipped_preview_limit: usize,
    pub inactive_preview_limit: usize,
    pub inactive_skipped_preview_limit: usize,
    /// Always excluded from inactivity scans, on top of the JSON defaults.
    pub excluded_categories: Vec<String>,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            default_inactive_days: 30,
            include_threads: true,
            zero_preview_limit: 20,
            zero_skipped_preview_limit: 5,
            inactive_preview_limit: 50,
            inactive_skipped_preview_limit: 10,
            excluded_categories: Vec::new(),
        }
    }
}

impl ScanSection {
    pub fn zero_limits(&self) -> PreviewLimits {
        PreviewLimits {
            members: self.zero_preview_limit,
            skipped: self.zero_skipped_preview_limit,
        }
    }

    pub fn inactive_limits(&self) -> PreviewLimits {
        PreviewLimits {
            members: self.inactive_preview_limit,
            skipped: self.inactive_skipped_preview_limit,
        }
    }
}

impl SweeperConfig {
    /// Load config from a TOML file, falling back to defaults when the file
    /// doesn't exist. Environment variables override TOML values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("DISCORD_TOKEN") {
            self.discord.token = v;
        }
        if let Some(v) = var("DISCORD_GUILD_ID") {
            self.discord.guild_id = v;
        }
        if let Some(v) = var("DISCORD_API_BASE") {
            self.discord.api_base = v;
        }
        if let Some(v) = var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Some(v) = var("HTTP_PORT")
            && let Ok(port) = v.trim().parse::<u16>()
        {
            let host = self
                .server
                .web_address
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".into());
            self.server.web_address = format!("{host}:{port}");
        }
        if let Some(v) = var("CSV_DIR") {
            self.storage.csv_dir = v;
        }
        if let Some(v) = var("IGNORE_DIR") {
            self.storage.ignore_dir = v;
        }
        if let Some(v) = var("CONFIG_DIR") {
            self.storage.config_dir = v;
        }
    }

    /// Startup check for the settings the bot cannot run without.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.discord.token.trim().is_empty() {
            bail!("DISCORD_TOKEN is required (set it in the environment or [discord] token)");
        }
        if self.discord.guild_id.trim().is_empty() {
            bail!("DISCORD_GUILD_ID is required (set it in the environment or [discord] guild_id)");
        }
        Ok(())
    }
}

/// JSON default lists that live next to the config, read once.
pub struct ChannelDefaults {
    dir: PathBuf,
    target_channels: OnceLock<Vec<String>>,
    excluded_categories: OnceLock<Vec<String>>,
}

impl ChannelDefaults {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            target_channels: OnceLock::new(),
            excluded_categories: OnceLock::new(),
        }
    }

    /// `targetChannels.json`, else the built-in list.
    pub fn target_channels(&self) -> &[String] {
        self.target_channels.get_or_init(|| {
            read_name_list(&self.dir.join("targetChannels.json")).unwrap_or_else(|| {
                FALLBACK_TARGET_CHANNELS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            })
        })
    }

    /// `inactiveCategories.local.json`, then `inactiveCategories.json`, else none.
    pub fn excluded_categories(&self) -> &[String] {
        self.excluded_categories.get_or_init(|| {
            ["inactiveCategories.local.json", "inactiveCategories.json"]
                .iter()
                .find_map(|name| read_name_list(&self.dir.join(name)))
                .unwrap_or_default()
        })
    }
}

/// A JSON array of strings, trimmed, blanks dropped. `None` when the file is
/// absent or unusable so the caller can fall through to the next source.
fn read_name_list(path: &Path) -> Option<Vec<String>> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Vec<String>>(&contents) {
        Ok(names) => Some(
            names
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        ),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed name list");
            None
        }
    }
}

/// Split a comma-separated environment list such as `INACTIVE_EXCLUDED_CATEGORIES`.
pub fn split_env_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SweeperConfig::default();
        assert_eq!(config.server.web_address, "0.0.0.0:3000");
        assert_eq!(config.discord.burst, 50);
        assert_eq!(config.scan.default_inactive_days, 30);
        assert_eq!(config.storage.csv_dir, "csv");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = SweeperConfig::from_toml(
            r#"
            [discord]
            token = "abc"
            guild_id = "900"

            [scan]
            include_threads = false
            "#,
        )
        .unwrap();
        assert_eq!(config.discord.token, "abc");
        assert_eq!(config.discord.api_base, "https://discord.com/api/v10");
        assert!(!config.scan.include_threads);
        assert_eq!(config.scan.inactive_preview_limit, 50);
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(SweeperConfig::from_toml("[discord\ntoken=").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SweeperConfig::default();
        config.apply_env_overrides(env(&[
            ("DISCORD_TOKEN", "tok"),
            ("DISCORD_GUILD_ID", "42"),
            ("HTTP_PORT", "8081"),
            ("CSV_DIR", "/tmp/out"),
        ]));
        assert_eq!(config.discord.token, "tok");
        assert_eq!(config.discord.guild_id, "42");
        assert_eq!(config.server.web_address, "0.0.0.0:8081");
        assert_eq!(config.storage.csv_dir, "/tmp/out");
    }

    #[test]
    fn test_invalid_port_ignored() {
        let mut config = SweeperConfig::default();
        config.apply_env_overrides(env(&[("HTTP_PORT", "http")]));
        assert_eq!(config.server.web_address, "0.0.0.0:3000");
    }

    #[test]
    fn test_missing_guild_id_rejected() {
        let mut config = SweeperConfig::default();
        config.discord.token = "tok".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DISCORD_GUILD_ID"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SweeperConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scan.zero_preview_limit, 20);
    }

    #[test]
    fn test_target_channels_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = ChannelDefaults::new(dir.path());
        assert_eq!(defaults.target_channels().len(), 4);
        assert_eq!(defaults.target_channels()[1], "general");
        assert!(defaults.excluded_categories().is_empty());
    }

    #[test]
    fn test_local_categories_take_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("inactiveCategories.json"), r#"["Shared"]"#).unwrap();
        std::fs::write(
            dir.path().join("inactiveCategories.local.json"),
            r#"[" Staff ", ""]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("targetChannels.json"), r#"["lobby"]"#).unwrap();

        let defaults = ChannelDefaults::new(dir.path());
        assert_eq!(defaults.excluded_categories(), ["Staff"]);
        assert_eq!(defaults.target_channels(), ["lobby"]);
    }

    #[test]
    fn test_malformed_list_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("inactiveCategories.local.json"), "{oops").unwrap();
        std::fs::write(dir.path().join("inactiveCategories.json"), r#"["Shared"]"#).unwrap();
        let defaults = ChannelDefaults::new(dir.path());
        assert_eq!(defaults.excluded_categories(), ["Shared"]);
    }

    #[test]
    fn test_split_env_list() {
        assert_eq!(
            split_env_list(Some(" Staff, ,Archive ".into())),
            vec!["Staff", "Archive"]
        );
        assert!(split_env_list(None).is_empty());
    }
}
