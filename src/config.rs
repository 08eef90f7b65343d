//! Configuration loading and management.
//!
//! Loads configuration from `./comanda.toml` (or `$COMANDA_CONFIG_PATH`).
//! Environment variables override file values; file values override
//! defaults. A missing file is not an error, the defaults are a working
//! configuration for everything except the API key.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::completion::gemini::DEFAULT_GEMINI_URL;
use crate::completion::CompletionOptions;
use crate::pipeline::orchestrator::AnalysisConfig;
use crate::pipeline::prompts::PromptSet;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from TOML.
///
/// Precedence: env vars > config file > defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ComandaConfig {
    /// Completion backend settings (`[completion]`).
    pub completion: CompletionConfig,
    /// Pipeline tuning (`[pipeline]`).
    pub pipeline: PipelineConfig,
    /// Prompt templates (`[prompts]`).
    pub prompts: PromptSet,
    /// Database settings (`[store]`).
    pub store: StoreConfig,
    /// Logging settings (`[log]`).
    pub log: LogConfig,
}

impl ComandaConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$COMANDA_CONFIG_PATH` or `./comanda.toml`.
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: ComandaConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config file found, using defaults");
                Ok(ComandaConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config file path.
    fn config_path() -> PathBuf {
        Self::config_path_with(|key| std::env::var(key).ok())
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("COMANDA_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("comanda.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids `set_var` races
    /// in parallel tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Completion. The bare GEMINI_API_KEY is accepted as a fallback
        // since that is the name the provider's docs tell people to set.
        if let Some(key) = env("COMANDA_API_KEY").or_else(|| env("GEMINI_API_KEY")) {
            self.completion.api_key = Some(key);
        }
        if let Some(v) = env("COMANDA_MODEL") {
            self.completion.model = v;
        }
        if let Some(v) = env("COMANDA_BASE_URL") {
            self.completion.base_url = v;
        }

        // Pipeline.
        if let Some(v) = env("COMANDA_SINGLE_CALL") {
            match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.pipeline.single_call = true,
                "0" | "false" | "no" => self.pipeline.single_call = false,
                _ => tracing::warn!(
                    var = "COMANDA_SINGLE_CALL",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Store.
        if let Some(v) = env("COMANDA_DB_PATH") {
            self.store.db_path = v;
        }

        // Logging.
        if let Some(v) = env("COMANDA_LOG_LEVEL") {
            self.log.level = v;
        }
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: ComandaConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Build the per-run analysis configuration from the loaded settings.
    pub fn analysis_config(&self) -> AnalysisConfig {
        let base = AnalysisConfig::default();
        AnalysisConfig {
            prompts: self.prompts.clone(),
            breakdown_options: self.pipeline.breakdown.apply(base.breakdown_options),
            structure_options: self.pipeline.structure.apply(base.structure_options),
            repair_options: self.pipeline.repair.apply(base.repair_options),
            single_call: self.pipeline.single_call,
        }
    }

    /// Resolved database file path.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.store.db_path)
    }

    /// Resolved directory for rotated log files.
    pub fn logs_dir(&self) -> PathBuf {
        PathBuf::from(&self.log.dir)
    }
}

// ---------------------------------------------------------------------------
// Completion config
// ---------------------------------------------------------------------------

/// Completion backend settings (`[completion]`).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// API key. Unset means analysis commands refuse to start.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Service base URL.
    pub base_url: String,
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "__REDACTED__"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_owned(),
            base_url: DEFAULT_GEMINI_URL.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline config
// ---------------------------------------------------------------------------

/// Pipeline tuning (`[pipeline]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Skip the breakdown phase and structure the raw message directly.
    pub single_call: bool,
    /// Overrides for the breakdown call (`[pipeline.breakdown]`).
    pub breakdown: GenerationTuning,
    /// Overrides for the structuring call (`[pipeline.structure]`).
    pub structure: GenerationTuning,
    /// Overrides for the repair call (`[pipeline.repair]`).
    pub repair: GenerationTuning,
}

/// Optional per-phase generation overrides.
///
/// Unset fields keep the phase's built-in tuning, so a config can adjust
/// one knob without restating the rest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationTuning {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    /// Output token cap.
    pub max_output_tokens: Option<u32>,
    /// Per-call timeout in seconds.
    pub timeout_seconds: Option<u64>,
}

impl GenerationTuning {
    fn apply(&self, base: CompletionOptions) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature.unwrap_or(base.temperature),
            top_p: self.top_p.unwrap_or(base.top_p),
            max_output_tokens: self.max_output_tokens.unwrap_or(base.max_output_tokens),
            timeout: self
                .timeout_seconds
                .map_or(base.timeout, Duration::from_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Store and logging config
// ---------------------------------------------------------------------------

/// Database settings (`[store]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file path.
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_file("comanda.db"),
        }
    }
}

/// Logging settings (`[log]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rotated JSON log files.
    pub dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: default_data_file("logs"),
        }
    }
}

/// Place a file or directory under the platform data dir, falling back to
/// the bare name (working directory) when no home is available.
fn default_data_file(name: &str) -> String {
    directories::ProjectDirs::from("", "", "comanda")
        .map(|dirs| dirs.data_dir().join(name).to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
