use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const RUNTIME_FILE: &str = "visualearn-config.json";
const USER_FILE: &str = "visualearn.json";

/// Gemini provider configuration from Config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL for the generative-language API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Candidate text model names, probed in order until one resolves
    #[serde(default = "default_model_names")]
    pub model_names: Vec<String>,

    /// Candidate vision model names, probed independently of the text list
    #[serde(default = "default_vision_model_names")]
    pub vision_model_names: Vec<String>,

    /// Output token cap applied to chat-session calls
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// HTTP client timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model_names() -> Vec<String> {
    vec![
        "gemini-1.5-flash".to_string(),
        "gemini-1.5-pro".to_string(),
        "gemini-pro".to_string(),
        "gemini-1.0-pro".to_string(),
    ]
}

fn default_vision_model_names() -> Vec<String> {
    vec![
        "gemini-1.5-flash".to_string(),
        "gemini-1.5-pro".to_string(),
        "gemini-pro-vision".to_string(),
        "gemini-1.0-pro-vision".to_string(),
    ]
}

fn default_max_output_tokens() -> u32 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model_names: default_model_names(),
            vision_model_names: default_vision_model_names(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Window defaults from Config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub default_width: u32,

    #[serde(default = "default_window_height")]
    pub default_height: u32,
}

fn default_window_width() -> u32 {
    500
}

fn default_window_height() -> u32 {
    700
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_width: default_window_width(),
            default_height: default_window_height(),
        }
    }
}

/// Saved window position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPosition {
    pub x: i32,
    pub y: i32,
}

/// Saved window size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

/// User override configuration (restricted fields)
#[derive(Deserialize)]
pub struct UserOverrideConfig {
    #[serde(alias = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(alias = "modelNames")]
    pub model_names: Option<Vec<String>>,
    #[serde(alias = "visionModelNames")]
    pub vision_model_names: Option<Vec<String>>,
}

/// Runtime configuration persisted across launches
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_position: Option<WindowPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<WindowSize>,
}

/// Global application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Runtime configuration (Internal use)
    #[serde(skip)]
    pub runtime: RuntimeConfig,

    /// Gemini provider configuration
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Window defaults
    #[serde(default)]
    pub window: WindowConfig,
}

impl AppConfig {
    /// Load configuration with layered strategy:
    /// 1. Defaults (Embedded Config.toml)
    /// 2. User Config (~/.visualearn/visualearn.json) - base URL / model lists
    /// 3. Runtime Config (~/.visualearn/visualearn-config.json) - credential and geometry
    pub fn load() -> Result<Self> {
        let default_str = include_str!("../Config.toml");
        let mut config: AppConfig = toml::from_str(default_str)
            .context("Failed to parse embedded Config.toml")?;

        if let Some(dir) = config_dir() {
            Self::apply_patch(&mut config, dir.join(USER_FILE));

            let runtime_path = dir.join(RUNTIME_FILE);
            if runtime_path.exists() {
                if let Ok(content) = fs::read_to_string(&runtime_path) {
                    match serde_json::from_str::<RuntimeConfig>(&content) {
                        Ok(runtime) => config.runtime = runtime,
                        Err(e) => {
                            log::warn!("Failed to parse runtime config at {}: {}", runtime_path.display(), e);
                        }
                    }
                }
            }
        }

        Ok(config)
    }

    pub fn save_runtime(&self) -> Result<()> {
        if let Some(dir) = config_dir() {
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
            }
            let runtime_path = dir.join(RUNTIME_FILE);
            let content = serde_json::to_string_pretty(&self.runtime)?;
            fs::write(runtime_path, content)?;
        }
        Ok(())
    }

    pub(crate) fn apply_patch<P: AsRef<Path>>(config: &mut AppConfig, path: P) {
        let path = path.as_ref();
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                // Try parsing as UserOverrideConfig to restrict fields
                match serde_json::from_str::<UserOverrideConfig>(&content) {
                    Ok(patch) => {
                        if let Some(base_url) = patch.base_url {
                            let base_url = base_url.trim().to_string();
                            if !base_url.is_empty() {
                                config.gemini.base_url = base_url;
                            }
                        }
                        if let Some(names) = patch.model_names {
                            if !names.is_empty() {
                                config.gemini.model_names = names;
                            }
                        }
                        if let Some(names) = patch.vision_model_names {
                            if !names.is_empty() {
                                config.gemini.vision_model_names = names;
                            }
                        }
                    }
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config patch at {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    pub fn to_public(&self) -> PublicAppConfig {
        PublicAppConfig {
            gemini: PublicGeminiConfig {
                base_url: self.gemini.base_url.clone(),
                model_names: self.gemini.model_names.clone(),
                vision_model_names: self.gemini.vision_model_names.clone(),
            },
            window: self.window.clone(),
            window_position: self.runtime.window_position,
            window_size: self.runtime.window_size,
            has_api_key: self
                .runtime
                .api_key
                .as_deref()
                .map_or(false, |k| !k.trim().is_empty()),
        }
    }
}

pub(crate) fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".visualearn"))
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicAppConfig {
    pub gemini: PublicGeminiConfig,
    pub window: WindowConfig,
    pub window_position: Option<WindowPosition>,
    pub window_size: Option<WindowSize>,
    pub has_api_key: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicGeminiConfig {
    pub base_url: String,
    pub model_names: Vec<String>,
    pub vision_model_names: Vec<String>,
}
