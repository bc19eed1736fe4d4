//! Configuration management
//!
//! Loads `config.toml` (or the path in `HANASU_CONFIG`) into a [`Config`],
//! with environment variables overriding individual fields at startup the
//! way spec.md §6 describes. Vendor API keys are never stored in the file;
//! they come from the environment only.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub asr: AsrConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key is read from `HANASU_LLM_API_KEY`, never stored here.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    4_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_ms: default_llm_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    #[serde(default = "default_asr_sample_rate")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_asr_language")]
    pub language_code: String,
}

fn default_asr_sample_rate() -> u32 {
    8_000
}

fn default_asr_language() -> String {
    "ja-JP".to_string()
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self { sample_rate_hz: default_asr_sample_rate(), language_code: default_asr_language() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_tts_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_tts_cache_dir() -> PathBuf {
    PathBuf::from("assets/tts_cache")
}

fn default_tts_queue_capacity() -> usize {
    8
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self { cache_dir: default_tts_cache_dir(), queue_capacity: default_tts_queue_capacity() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: f32,
    #[serde(default = "default_fast_end_windows")]
    pub fast_end_windows: usize,
    #[serde(default = "default_slow_end_windows")]
    pub slow_end_windows: usize,
}

fn default_volume_threshold() -> f32 {
    1000.0
}

fn default_fast_end_windows() -> usize {
    20
}

fn default_slow_end_windows() -> usize {
    80
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            volume_threshold: default_volume_threshold(),
            fast_end_windows: default_fast_end_windows(),
            slow_end_windows: default_slow_end_windows(),
        }
    }
}

impl From<VadConfig> for crate::vad::VadConfig {
    fn from(c: VadConfig) -> Self {
        crate::vad::VadConfig {
            volume_threshold: c.volume_threshold,
            fast_end_windows: c.fast_end_windows,
            slow_end_windows: c.slow_end_windows,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_dialogue_templates_path")]
    pub dialogue_path: PathBuf,
}

fn default_dialogue_templates_path() -> PathBuf {
    PathBuf::from("templates/dialogue.json")
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self { dialogue_path: default_dialogue_templates_path() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            asr: AsrConfig::default(),
            tts: TtsConfig::default(),
            vad: VadConfig::default(),
            templates: TemplatesConfig::default(),
        }
    }
}

impl Config {
    /// Load from `HANASU_CONFIG` (or `config.toml` in the working
    /// directory if unset and present), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HANASU_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading config file {}", config_path.display()))?;
            toml::from_str(&contents).context("parsing config.toml")?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("HANASU_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("HANASU_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(port) = std::env::var("HANASU_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(host) = std::env::var("HANASU_HOST") {
            self.server.host = host;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_server_binding() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn vad_config_converts_into_runtime_vad_config() {
        let config = VadConfig::default();
        let runtime: crate::vad::VadConfig = config.into();
        assert_eq!(runtime.volume_threshold, 1000.0);
        assert_eq!(runtime.fast_end_windows, 20);
    }

    #[test]
    fn env_override_sets_llm_api_key_without_touching_file_defaults() {
        std::env::set_var("HANASU_LLM_API_KEY", "test-key-value");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.llm.api_key.as_deref(), Some("test-key-value"));
        std::env::remove_var("HANASU_LLM_API_KEY");
    }
}
