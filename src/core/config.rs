use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::error::ConfigError;
use crate::core::model::ModelId;

/// Volcengine Ark gateway (OpenAI-compatible)
const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

const DEFAULT_RESUME_CONTEXT: &str = include_str!("../../assets/resume_context.txt");

const CONFIG_DIR_NAME: &str = "portfolio-assistant";
const LOCAL_CONFIG_FILE: &str = "portfolio-assistant.json";

/// Secret credential. Never printed, never sent anywhere but the auth header.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    #[serde(default, skip_serializing)]
    pub api_key: Option<ApiKey>,

    /// Base URL of the OpenAI-compatible gateway, without `/chat/completions`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub model: ModelId,

    /// Omitted from requests when unset
    #[serde(default)]
    pub max_tokens: Option<u64>,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub debug: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            api_key: None,
            base_url: default_base_url(),
            model: ModelId::default(),
            max_tokens: None,
            chat: ChatConfig::default(),
            analysis: AnalysisConfig::default(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Upper bound for one whole turn, stream included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Resume text file; the built-in resume is used when unset
    #[serde(default)]
    pub context_path: Option<PathBuf>,

    #[serde(default = "default_subject_name")]
    pub subject_name: String,

    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_subject_name() -> String {
    "Shuyue Hou".into()
}

fn default_welcome_message() -> String {
    "Hello! I am Shuyue's AI Assistant. Ask me anything about her experience, Project details, or Education!".into()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            context_path: None,
            subject_name: default_subject_name(),
            welcome_message: default_welcome_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Band half-width in standard deviations
    #[serde(default = "default_threshold_k")]
    pub threshold_k: f64,
}

fn default_threshold_k() -> f64 {
    2.0
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            threshold_k: default_threshold_k(),
        }
    }
}

pub fn load_config(working_dir: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let global_path = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join("config.json"));
    load_config_from(global_path.as_deref(), working_dir, |name| {
        std::env::var(name).ok()
    })
}

/// Layering: defaults, global file, project-local file, then environment.
pub fn load_config_from(
    global_path: Option<&Path>,
    working_dir: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let wd = working_dir.unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let mut config = AppConfig::default();
    config.working_dir = wd.clone();

    if let Some(path) = global_path {
        if path.exists() {
            merge_config(&mut config, read_config_file(path)?);
        }
    }

    let local_path = wd.join(LOCAL_CONFIG_FILE);
    if local_path.exists() {
        merge_config(&mut config, read_config_file(&local_path)?);
    }

    detect_env(&mut config, env);

    if config.chat.timeout_secs == 0 {
        return Err(ConfigError::Invalid("chat.timeout_secs must be positive".into()));
    }
    if !(config.analysis.threshold_k.is_finite() && config.analysis.threshold_k > 0.0) {
        return Err(ConfigError::Invalid(
            "analysis.threshold_k must be a positive number".into(),
        ));
    }

    tracing::debug!(
        working_dir = %config.working_dir.display(),
        base_url = %config.base_url,
        model = %config.model,
        has_api_key = config.has_api_key(),
        "configuration loaded"
    );

    Ok(config)
}

fn read_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::File(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))
}

fn merge_config(base: &mut AppConfig, overlay: AppConfig) {
    if overlay.api_key.is_some() {
        base.api_key = overlay.api_key;
    }
    if overlay.base_url != default_base_url() {
        base.base_url = overlay.base_url;
    }
    if overlay.model != ModelId::default() {
        base.model = overlay.model;
    }
    if overlay.max_tokens.is_some() {
        base.max_tokens = overlay.max_tokens;
    }
    if overlay.chat.timeout_secs != default_timeout_secs() {
        base.chat.timeout_secs = overlay.chat.timeout_secs;
    }
    if overlay.chat.context_path.is_some() {
        base.chat.context_path = overlay.chat.context_path;
    }
    if overlay.chat.subject_name != default_subject_name() {
        base.chat.subject_name = overlay.chat.subject_name;
    }
    if overlay.chat.welcome_message != default_welcome_message() {
        base.chat.welcome_message = overlay.chat.welcome_message;
    }
    if overlay.analysis.threshold_k != default_threshold_k() {
        base.analysis.threshold_k = overlay.analysis.threshold_k;
    }
    if overlay.debug {
        base.debug = true;
    }
}

fn detect_env(config: &mut AppConfig, env: impl Fn(&str) -> Option<String>) {
    if !config.has_api_key() {
        // ARK_API_KEY is the Volcengine name; OPENAI_API_KEY covers other gateways
        for name in ["ARK_API_KEY", "OPENAI_API_KEY"] {
            if let Some(key) = env(name).filter(|k| !k.trim().is_empty()) {
                config.api_key = Some(ApiKey::new(key));
                break;
            }
        }
    }

    if let Some(url) = env("PORTFOLIO_BASE_URL").filter(|u| !u.is_empty()) {
        config.base_url = url;
    }
    if let Some(model) = env("PORTFOLIO_MODEL").filter(|m| !m.is_empty()) {
        config.model = ModelId(model);
    }
}

impl AppConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().map_or(false, |k| !k.is_empty())
    }

    /// The credential, or `MissingApiKey` when it is absent or blank.
    pub fn require_api_key(&self) -> Result<&ApiKey, ConfigError> {
        self.api_key.as_ref().filter(|k| !k.is_empty()).ok_or_else(|| {
            ConfigError::MissingApiKey(
                "ARK_API_KEY not set. Set via env var or config file.".into(),
            )
        })
    }

    /// Resume text used verbatim inside the hidden system prompt.
    pub fn resume_context(&self) -> Result<String, ConfigError> {
        match &self.chat.context_path {
            Some(path) => {
                let full_path = if path.is_absolute() {
                    path.clone()
                } else {
                    self.working_dir.join(path)
                };
                std::fs::read_to_string(&full_path)
                    .map_err(|e| ConfigError::File(format!("{}: {e}", full_path.display())))
            }
            None => Ok(DEFAULT_RESUME_CONTEXT.to_string()),
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.chat.timeout_secs)
    }
}
