use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::{
    profile::{Profile, ProfileKind, Thresholds},
    semantic::DEFAULT_MODEL,
    storage,
};

const CONFIG_FILE: &str = "config.yaml";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5004";
const DEFAULT_UPSTREAM_URL: &str = "https://api.airtable.com/v0";
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Optional overrides for the profile's built-in thresholds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard: Option<f32>,
    /// `max_output` for single-threshold profiles, `top_limit` for dual.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticConfig {
    #[serde(default = "default_model")]
    pub model: String,

    /// Models are cached under `<cache_dir>/models`. Defaults to the base
    /// directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            cache_dir: None,
        }
    }
}

/// A related table whose records resolve linked ids to display names.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LookupTable {
    /// Upstream field on the main table holding the linked ids.
    pub field: String,
    pub table: String,
    /// Field carrying the display name. Detected from the first record when
    /// unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_field: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub api_url: String,
    #[serde(default)]
    pub base_id: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub main_table: String,
    #[serde(default)]
    pub lookups: Vec<LookupTable>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_upstream_url(),
            base_id: String::new(),
            token_env: default_token_env(),
            main_table: String::new(),
            lookups: vec![],
            page_size: DEFAULT_PAGE_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_profile")]
    pub profile: ProfileKind,

    /// Dataset file, relative paths resolve against the base directory.
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,

    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub thresholds: ThresholdOverrides,

    #[serde(default)]
    pub semantic: SemanticConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            dataset_path: default_dataset_path(),
            checkpoint_path: default_checkpoint_path(),
            listen_addr: default_listen_addr(),
            thresholds: ThresholdOverrides::default(),
            semantic: SemanticConfig::default(),
            upstream: UpstreamConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_profile() -> ProfileKind {
    ProfileKind::Client
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("dataset.csv")
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("last_sync.json")
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_upstream_url() -> String {
    DEFAULT_UPSTREAM_URL.to_string()
}

fn default_token_env() -> String {
    "KWMATCH_UPSTREAM_TOKEN".to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

/// Base directory: `KWMATCH_BASE_PATH` or `~/.local/share/kwmatch`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("KWMATCH_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .context("couldnt find home dir")?
        .context("couldnt find home dir")?;
    Ok(home.join(".local/share/kwmatch"))
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let t = &self.thresholds;
        for (name, value) in [("soft", t.soft), ("hard", t.hard)] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    bail!("thresholds.{name} must be between 0.0 and 1.0, got {value}");
                }
            }
        }
        if t.limit == Some(0) {
            bail!("thresholds.limit must be greater than 0");
        }

        if let Thresholds::Dual { hard, soft, .. } = self.build_profile().thresholds {
            if hard < soft {
                bail!("hard threshold {hard} is below soft threshold {soft}");
            }
        }

        let up = &self.upstream;
        if up.page_size == 0 || up.page_size > 100 {
            bail!("upstream.page_size must be within 1..=100, got {}", up.page_size);
        }
        if up.timeout_secs == 0 {
            bail!("upstream.timeout_secs must be greater than 0");
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("couldnt create {}", base_path.display()))?;
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            storage::write_atomic(
                &config_path,
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("couldnt read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        Ok(config)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.base_path.join(&self.dataset_path)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.base_path.join(&self.checkpoint_path)
    }

    pub fn model_cache_dir(&self) -> PathBuf {
        self.semantic
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.base_path.clone())
    }

    /// Profile for `self.profile` with threshold overrides applied.
    pub fn build_profile(&self) -> Profile {
        let mut profile = Profile::for_kind(self.profile);
        let t = &self.thresholds;

        profile.thresholds = match profile.thresholds {
            Thresholds::Single { soft, max_output } => Thresholds::Single {
                soft: t.soft.unwrap_or(soft),
                max_output: t.limit.unwrap_or(max_output),
            },
            Thresholds::Dual {
                hard,
                soft,
                top_limit,
            } => Thresholds::Dual {
                hard: t.hard.unwrap_or(hard),
                soft: t.soft.unwrap_or(soft),
                top_limit: t.limit.unwrap_or(top_limit),
            },
        };

        profile
    }
}
