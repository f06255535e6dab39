use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::eid::Eid;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_API_BASE: &str = "https://app.linkdrop.dev";
const DEFAULT_DASHBOARD_PATTERNS: [&str; 4] = [
    "http://localhost:3000/*",
    "http://localhost:5173/*",
    "http://127.0.0.1:3000/*",
    "https://app.linkdrop.dev/*",
];
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;
const DEFAULT_TAB_LOAD_DEBOUNCE_MS: u64 = 1000;
/// Time the receiving script gets to register its listener after injection
const DEFAULT_INJECT_SETTLE_MS: u64 = 150;
const DEFAULT_MAX_RETRIES: u8 = 3;
const DEFAULT_MAX_QUEUE_LEN: usize = 500;
const DEFAULT_ENRICH_MAX_CHARS: usize = 100_000;
const DEFAULT_ENRICH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LISTEN: &str = "127.0.0.1:8787";

/// What `enqueue` does when the outbound queue is at `max_queue_len`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    EvictOldest,
    Reject,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Base url of the enrichment service. The `apiBase` store key wins when set.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Tabs whose url matches one of these (`*` wildcard) receive sync messages
    #[serde(default = "default_dashboard_patterns")]
    pub dashboard_patterns: Vec<String>,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_tab_load_debounce_ms")]
    pub tab_load_debounce_ms: u64,

    #[serde(default = "default_inject_settle_ms")]
    pub inject_settle_ms: u64,

    /// A message is dropped once it failed this many flushes on top of the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,

    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,

    #[serde(default)]
    pub overflow: OverflowPolicy,

    #[serde(default = "default_enrich_max_chars")]
    pub enrich_max_chars: usize,

    #[serde(default = "default_enrich_timeout_secs")]
    pub enrich_timeout_secs: u64,

    #[serde(default = "default_listen")]
    pub listen: String,

    /// DevTools websocket of the browser hosting the dashboard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_ws_url: Option<String>,

    /// Reported as `extensionId` in ping responses
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    #[serde(skip_serializing, skip_deserializing)]
    pub(crate) base_path: PathBuf,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_dashboard_patterns() -> Vec<String> {
    DEFAULT_DASHBOARD_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_flush_interval_secs() -> u64 {
    DEFAULT_FLUSH_INTERVAL_SECS
}

fn default_tab_load_debounce_ms() -> u64 {
    DEFAULT_TAB_LOAD_DEBOUNCE_MS
}

fn default_inject_settle_ms() -> u64 {
    DEFAULT_INJECT_SETTLE_MS
}

fn default_max_retries() -> u8 {
    DEFAULT_MAX_RETRIES
}

fn default_max_queue_len() -> usize {
    DEFAULT_MAX_QUEUE_LEN
}

fn default_enrich_max_chars() -> usize {
    DEFAULT_ENRICH_MAX_CHARS
}

fn default_enrich_timeout_secs() -> u64 {
    DEFAULT_ENRICH_TIMEOUT_SECS
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_instance_id() -> String {
    Eid::new().to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            dashboard_patterns: default_dashboard_patterns(),
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            tab_load_debounce_ms: DEFAULT_TAB_LOAD_DEBOUNCE_MS,
            inject_settle_ms: DEFAULT_INJECT_SETTLE_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            overflow: OverflowPolicy::default(),
            enrich_max_chars: DEFAULT_ENRICH_MAX_CHARS,
            enrich_timeout_secs: DEFAULT_ENRICH_TIMEOUT_SECS,
            listen: default_listen(),
            chrome_ws_url: None,
            instance_id: default_instance_id(),
            base_path: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dashboard_patterns.is_empty() {
            bail!("dashboard_patterns must contain at least one pattern");
        }

        if self.flush_interval_secs == 0 {
            bail!("flush_interval_secs must be greater than 0");
        }

        if self.max_queue_len == 0 {
            bail!("max_queue_len must be greater than 0");
        }

        if self.enrich_max_chars == 0 {
            bail!("enrich_max_chars must be greater than 0");
        }

        if self.enrich_timeout_secs == 0 {
            bail!("enrich_timeout_secs must be greater than 0");
        }

        if let Err(err) = reqwest::Url::parse(&self.api_base) {
            bail!("api_base {:?} is not a valid url: {err}", self.api_base);
        }

        Ok(())
    }

    pub fn load_with(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base_path = base_path.as_ref();
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            let fresh = Self {
                base_path: base_path.to_path_buf(),
                ..Default::default()
            };
            fresh.save()?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = self.base_path.join(CONFIG_FILE);
        let temp_path = self.base_path.join(format!("{}-{CONFIG_FILE}", Eid::new()));

        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&temp_path, config_str)?;
        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("failed to write {}", path.display()))?;

        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join("config.yaml").exists());
        assert_eq!(config.flush_interval_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.inject_settle_ms, 150);
        assert_eq!(config.enrich_max_chars, 100_000);
        assert_eq!(config.overflow, OverflowPolicy::EvictOldest);
        assert_eq!(config.dashboard_patterns.len(), 4);
    }

    #[test]
    fn test_instance_id_is_stable_across_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let first = Config::load_with(tmp.path()).unwrap();
        let second = Config::load_with(tmp.path()).unwrap();

        assert_eq!(first.instance_id, second.instance_id);
    }

    #[test]
    fn test_partial_config_is_upgraded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.yaml"),
            "max_queue_len: 7\noverflow: reject\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.max_queue_len, 7);
        assert_eq!(config.overflow, OverflowPolicy::Reject);

        let saved = std::fs::read_to_string(tmp.path().join("config.yaml")).unwrap();
        assert!(saved.contains("flush_interval_secs: 30"));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.yaml"), "flush_interval_secs: 0\n").unwrap();
        assert!(Config::load_with(tmp.path()).is_err());

        std::fs::write(tmp.path().join("config.yaml"), "dashboard_patterns: []\n").unwrap();
        assert!(Config::load_with(tmp.path()).is_err());

        std::fs::write(tmp.path().join("config.yaml"), "api_base: not a url\n").unwrap();
        assert!(Config::load_with(tmp.path()).is_err());
    }
}
