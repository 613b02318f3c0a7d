use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Only run the local sentiment assessor in the live cycle
    #[serde(default)]
    pub local_only: bool,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_embed_timeout_ms")]
    pub embed_timeout_ms: u64,
    /// Upper bound for slower remote calls (window summaries, background concept warm-up)
    #[serde(default = "default_remote_call_timeout_ms")]
    pub remote_call_timeout_ms: u64,
    /// Drop the standing warning after a clean evaluation cycle
    #[serde(default)]
    pub clear_warning_on_pass: bool,

    // Remote assessors (OpenAI-compatible embeddings endpoint)
    #[serde(default)]
    pub embedding_api_url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_api_key: Option<String>,
    #[serde(default)]
    pub summarize_model: Option<String>,

    // Thresholds
    #[serde(default = "default_sentiment_slope_threshold")]
    pub sentiment_slope_threshold: f64,
    #[serde(default = "default_sentiment_delta_threshold")]
    pub sentiment_delta_threshold: f64,
    #[serde(default = "default_goal_similarity_threshold")]
    pub goal_similarity_threshold: f64,
    #[serde(default = "default_risk_high_threshold")]
    pub risk_high_threshold: f64,
    #[serde(default = "default_risk_moderate_threshold")]
    pub risk_moderate_threshold: f64,
}

fn default_true() -> bool {
    true
}

fn default_window_size() -> usize {
    10
}

fn default_embed_timeout_ms() -> u64 {
    150
}

fn default_remote_call_timeout_ms() -> u64 {
    2000
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_sentiment_slope_threshold() -> f64 {
    -0.1
}

fn default_sentiment_delta_threshold() -> f64 {
    -0.3
}

fn default_goal_similarity_threshold() -> f64 {
    0.6
}

fn default_risk_high_threshold() -> f64 {
    0.75
}

fn default_risk_moderate_threshold() -> f64 {
    0.6
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_only: false,
            window_size: default_window_size(),
            embed_timeout_ms: default_embed_timeout_ms(),
            remote_call_timeout_ms: default_remote_call_timeout_ms(),
            clear_warning_on_pass: false,
            embedding_api_url: None,
            embedding_model: default_embedding_model(),
            embedding_api_key: None,
            summarize_model: None,
            sentiment_slope_threshold: default_sentiment_slope_threshold(),
            sentiment_delta_threshold: default_sentiment_delta_threshold(),
            goal_similarity_threshold: default_goal_similarity_threshold(),
            risk_high_threshold: default_risk_high_threshold(),
            risk_moderate_threshold: default_risk_moderate_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GoalsConfig {
    /// Write the active goal set to `goals.toml` so it survives restarts
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Tool-call rounds allowed before the loop falls back to partial text
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    // Storage
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_persona")]
    pub persona: String,

    #[serde(default)]
    pub sidecar: SidecarConfig,
    #[serde(default)]
    pub goals: GoalsConfig,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_max_tool_rounds() -> usize {
    3
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("confidant"))
        .unwrap_or_else(|| PathBuf::from("confidant_data"))
}

fn default_persona() -> String {
    "sage".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_tool_rounds: default_max_tool_rounds(),
            data_dir: default_data_dir(),
            persona: default_persona(),
            sidecar: SidecarConfig::default(),
            goals: GoalsConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("confidant_config.toml")
    }

    /// Load config from confidant_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<AgentConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Defaults overlaid with environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("LLM_API_URL") {
            config.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm_model = model;
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            config.llm_api_key = Some(key);
        }

        if let Ok(rounds) = env::var("CONFIDANT_MAX_TOOL_ROUNDS") {
            if let Ok(rounds) = rounds.parse() {
                config.max_tool_rounds = rounds;
            }
        }

        if let Ok(dir) = env::var("CONFIDANT_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(persona) = env::var("CONFIDANT_PERSONA") {
            if !persona.trim().is_empty() {
                config.persona = persona;
            }
        }

        if let Ok(url) = env::var("EMBEDDING_API_URL") {
            if !url.trim().is_empty() {
                config.sidecar.embedding_api_url = Some(url);
            }
        }

        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            config.sidecar.embedding_model = model;
        }

        if let Ok(key) = env::var("EMBEDDING_API_KEY") {
            config.sidecar.embedding_api_key = Some(key);
        }

        if let Some(enabled) = env_flag("SIDECAR_ENABLED") {
            config.sidecar.enabled = enabled;
        }

        if let Some(local_only) = env_flag("SIDECAR_LOCAL_ONLY") {
            config.sidecar.local_only = local_only;
        }

        if let Some(clear) = env_flag("SIDECAR_CLEAR_WARNING_ON_PASS") {
            config.sidecar.clear_warning_on_pass = clear;
        }

        if let Ok(timeout) = env::var("SIDECAR_EMBED_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                config.sidecar.embed_timeout_ms = ms;
            }
        }

        if let Some(persist) = env_flag("CONFIDANT_PERSIST_GOALS") {
            config.goals.persist = persist;
        }

        config
    }

    pub fn personas_dir(&self) -> PathBuf {
        self.data_dir.join("personas")
    }

    pub fn relationships_dir(&self) -> PathBuf {
        self.data_dir.join("relationships")
    }

    pub fn goals_path(&self) -> PathBuf {
        self.data_dir.join("goals.toml")
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|value| {
        value.eq_ignore_ascii_case("1")
            || value.eq_ignore_ascii_case("true")
            || value.eq_ignore_ascii_case("yes")
    })
}
