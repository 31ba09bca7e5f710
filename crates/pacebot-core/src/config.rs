//! Configuration: YAML config + env var overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::delay::DelayModel;
use crate::prompts::{DEFAULT_CANNED_REPLY, DEFAULT_IDENTITY_PROBES, DEFAULT_PERSONA};
use crate::types::ModelParams;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chat model name
    #[serde(default = "default_model")]
    pub model: String,

    /// API key (set here or via OPENAI_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Sent as the OpenAI-Project header when present
    #[serde(default)]
    pub project_id: Option<String>,

    /// Base URL for the Chat Completions API
    #[serde(default)]
    pub base_url: Option<String>,

    /// Max output tokens per completion
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Where conversation memory is flushed
    #[serde(default = "default_memory_file")]
    pub memory_file: PathBuf,

    /// Seconds between memory flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,

    /// Max stored turns per conversation, system turn included
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    #[serde(default)]
    pub pacing: PacingConfig,

    /// System instruction for new conversations
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Reply used for identity probes
    #[serde(default = "default_canned_reply")]
    pub canned_reply: String,

    #[serde(default = "default_identity_probes")]
    pub identity_probes: Vec<String>,

    /// The bot's own account id on the transport, for echo suppression
    #[serde(default)]
    pub self_id: Option<String>,
}

/// Human-like reply pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Characters per second, used for both reading and typing
    #[serde(default = "default_reading_rate")]
    pub reading_rate: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_output_tokens() -> u32 {
    150
}
fn default_temperature() -> f32 {
    0.7
}
fn default_memory_file() -> PathBuf {
    PathBuf::from("threads.json")
}
fn default_flush_interval() -> u64 {
    5
}
fn default_history_cap() -> usize {
    10
}
fn default_base_delay_ms() -> u64 {
    10_000
}
fn default_reading_rate() -> u64 {
    15
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_persona() -> String {
    DEFAULT_PERSONA.into()
}
fn default_canned_reply() -> String {
    DEFAULT_CANNED_REPLY.into()
}
fn default_identity_probes() -> Vec<String> {
    DEFAULT_IDENTITY_PROBES.iter().map(|s| s.to_string()).collect()
}

impl Config {
    /// Load config from a YAML file with env var overrides.
    /// A missing file is not an error; defaults are used instead.
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut config: Config = if config_path.is_file() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
            serde_yaml::from_str(&content).context("Failed to parse config.yaml")?
        } else {
            Config::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load config from the default location (dir/config.yaml)
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join("config.yaml"))
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(project) = std::env::var("OPENAI_PROJECT_ID") {
            self.project_id = Some(project);
        }
        if let Ok(m) = std::env::var("PACEBOT_MODEL") {
            self.model = m;
        }
        if let Ok(url) = std::env::var("PACEBOT_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Ok(path) = std::env::var("PACEBOT_MEMORY_FILE") {
            self.memory_file = PathBuf::from(path);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.history_cap < 2 {
            anyhow::bail!(
                "history_cap must be at least 2 (system turn plus one exchange turn), got {}",
                self.history_cap
            );
        }
        if self.pacing.reading_rate == 0 {
            anyhow::bail!("pacing.reading_rate must be greater than zero");
        }
        if self.pacing.max_delay_ms < self.pacing.base_delay_ms {
            anyhow::bail!(
                "pacing.max_delay_ms ({}) must not be below pacing.base_delay_ms ({})",
                self.pacing.max_delay_ms,
                self.pacing.base_delay_ms
            );
        }
        if self.flush_interval_seconds == 0 {
            anyhow::bail!("flush_interval_seconds must be greater than zero");
        }
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            model: self.model.clone(),
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
        }
    }

    pub fn delay_model(&self) -> DelayModel {
        DelayModel {
            base_ms: self.pacing.base_delay_ms,
            reading_rate: self.pacing.reading_rate,
            max_ms: self.pacing.max_delay_ms,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            reading_rate: default_reading_rate(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            project_id: None,
            base_url: None,
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            memory_file: default_memory_file(),
            flush_interval_seconds: default_flush_interval(),
            history_cap: default_history_cap(),
            pacing: PacingConfig::default(),
            persona: default_persona(),
            canned_reply: default_canned_reply(),
            identity_probes: default_identity_probes(),
            self_id: None,
        }
    }
}
