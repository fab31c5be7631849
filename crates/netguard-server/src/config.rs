//! Gateway configuration: TOML file + CLI overrides.

use netguard_core::{NetguardError, NetguardResult, DEFAULT_PORT};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub gateway: GatewaySection,
}

/// `[gateway]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_page")]
    pub page: String,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub autostart: bool,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            port: default_port(),
            page: default_page(),
            allowlist: Vec::new(),
            autostart: false,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_page() -> String {
    "server_index.html".to_string()
}

/// Values given on the command line. `None`/empty means "use the file".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub page: Option<String>,
    pub allowlist: Vec<String>,
    pub autostart: bool,
}

/// Resolved gateway configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub page_path: PathBuf,
    pub allowlist: Vec<String>,
    pub autostart: bool,
}

impl GatewayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// A missing file is not an error: defaults are used.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> NetguardResult<Self> {
        let file_config = match config_path.map(expand_tilde) {
            Some(expanded) if expanded.exists() => {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| NetguardError::Config(format!("{}: {e}", expanded.display())))?
            }
            Some(expanded) => {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        let section = file_config.gateway;
        let page = overrides.page.unwrap_or(section.page);
        let allowlist = if overrides.allowlist.is_empty() {
            section.allowlist
        } else {
            overrides.allowlist
        };

        Ok(Self {
            port: overrides.port.unwrap_or(section.port),
            page_path: expand_tilde_str(&page),
            allowlist,
            autostart: overrides.autostart || section.autostart,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
