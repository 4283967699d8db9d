//! Configuration file support for chatrender
//!
//! Config is loaded from `~/.chatrender/config.toml` (or `$CHATRENDER_HOME/config.toml`).
//! Environment variables override config file settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global config instance (loaded once on first access)
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::load)
}

/// Root directory for config and logs.
pub fn chatrender_dir() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("CHATRENDER_HOME") {
        return Ok(PathBuf::from(path));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("No home directory"))?;
    Ok(home.join(".chatrender"))
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Remote diagram rendering
    pub render: RenderConfig,

    /// Host page settings
    pub page: PageConfig,

    /// Generated-image link detection
    pub images: ImageConfig,

    /// Log verbosity
    pub logging: LoggingConfig,
}

/// Remote diagram rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// POST target that turns mermaid source into SVG
    pub diagram_endpoint: String,
    /// Per-request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// User agent sent with every outbound request
    pub user_agent: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            diagram_endpoint: "https://kroki.io/mermaid/svg".to_string(),
            timeout_secs: 30,
            user_agent: format!("Mozilla/5.0 (compatible; chatrender/{})", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Host page configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PageConfig {
    /// Origin that relative script/stylesheet references are resolved against
    pub base_url: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gemini.google.com/app".to_string(),
        }
    }
}

/// Which hyperlinks count as generated-image links
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageConfig {
    /// Links starting with this are image URLs themselves
    pub direct_prefix: String,
    /// Links containing this wrap the image URL in a query parameter
    pub wrapper_marker: String,
    /// Query parameter holding the wrapped image URL
    pub wrapper_param: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            direct_prefix: "https://image.pollinations.ai/prompt/".to_string(),
            wrapper_marker: "google.com/search?q=https://image.pollinations.ai/prompt/"
                .to_string(),
            wrapper_param: "q".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write DEBUG lines (processed diagram source, applied fixes)
    pub trace: bool,
}

impl Config {
    /// Get the config file path
    pub fn path() -> Option<PathBuf> {
        chatrender_dir().ok().map(|d| d.join("config.toml"))
    }

    /// Load config from file, with environment variable overrides
    pub fn load() -> Self {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    /// Parse a config document (no env overrides)
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn load_from_file() -> Option<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return None;
        }

        let content = std::fs::read_to_string(&path).ok()?;
        match Self::from_toml(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                crate::logging::error(&format!("Failed to parse config file: {}", e));
                None
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CHATRENDER_DIAGRAM_ENDPOINT") {
            self.render.diagram_endpoint = v;
        }
        if let Ok(v) = std::env::var("CHATRENDER_TIMEOUT_SECS") {
            if let Ok(secs) = v.trim().parse::<u64>() {
                self.render.timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("CHATRENDER_BASE_URL") {
            self.page.base_url = v;
        }
        if let Ok(v) = std::env::var("CHATRENDER_TRACE") {
            self.logging.trace = parse_env_bool(&v).unwrap_or(true);
        }
    }

    /// Write a commented default config if none exists yet
    pub fn create_default_config_file() -> anyhow::Result<PathBuf> {
        let path = Self::path().ok_or_else(|| anyhow::anyhow!("No config path"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let defaults = Self::default();
        let default_content = format!(
            r#"# chatrender configuration file
# Location: ~/.chatrender/config.toml
#
# Environment variables override these settings:
# CHATRENDER_DIAGRAM_ENDPOINT, CHATRENDER_TIMEOUT_SECS, CHATRENDER_BASE_URL, CHATRENDER_TRACE

[render]
diagram_endpoint = "{}"
timeout_secs = {}

[page]
base_url = "{}"

[images]
direct_prefix = "{}"
wrapper_marker = "{}"
wrapper_param = "{}"

[logging]
trace = false
"#,
            defaults.render.diagram_endpoint,
            defaults.render.timeout_secs,
            defaults.page.base_url,
            defaults.images.direct_prefix,
            defaults.images.wrapper_marker,
            defaults.images.wrapper_param,
        );

        if !path.exists() {
            std::fs::write(&path, default_content)?;
        }
        Ok(path)
    }

    /// Human-readable summary for `chatrender config`
    pub fn display_string(&self) -> String {
        let path = Self::path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "Configuration ({})\n\
             render.diagram_endpoint = {}\n\
             render.timeout_secs = {}\n\
             page.base_url = {}\n\
             images.direct_prefix = {}\n\
             images.wrapper_marker = {}\n\
             images.wrapper_param = {}\n\
             logging.trace = {}",
            path,
            self.render.diagram_endpoint,
            self.render.timeout_secs,
            self.page.base_url,
            self.images.direct_prefix,
            self.images.wrapper_marker,
            self.images.wrapper_param,
            self.logging.trace,
        )
    }
}

fn parse_env_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
