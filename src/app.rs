use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::api::models::Coordinates;
use crate::error::Result;
use crate::socket::SocketConfig;
use crate::storage::LocalStore;

/// Environment variable overriding the configured server address.
pub const API_URL_ENV: &str = "ROOMCHAT_API_URL";
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Chat server address, e.g. `https://chat.example.com`.
    pub base_url: Option<String>,
    pub socket: SocketConfig,
    /// Position reported when sharing location. Unset means unsupported.
    pub location: Option<Coordinates>,
}

impl AppConfig {
    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("roomchat.toml"))
    }

    /// Load the user's config, falling back to defaults when it is missing
    /// or unreadable.
    pub fn load() -> Self {
        let Some(path) = Self::toml_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::warn!("ignoring {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self) -> std::io::Result<()> {
        match Self::toml_path() {
            Some(path) => self.save_to(&path),
            None => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "No config dir")),
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        fs::write(path, toml)
    }

    /// Server address from the environment, else the file, else the default.
    pub fn base_url(&self) -> Result<Url> {
        self.resolve_base_url(std::env::var(API_URL_ENV).ok())
    }

    pub fn resolve_base_url(&self, env_override: Option<String>) -> Result<Url> {
        let raw = env_override
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.base_url.clone().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Url::parse(&normalize_url(&raw))?)
    }
}

/// Trim, default the scheme to `http://` and drop trailing slashes.
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Which view the app opens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Chat { token: String },
}

/// The chat view needs a stored token; without one the user logs in first.
pub fn initial_route(store: &LocalStore) -> Route {
    match store.token() {
        Ok(Some(token)) => Route::Chat { token },
        Ok(None) => Route::Login,
        Err(e) => {
            log::warn!("could not read stored token: {e}");
            Route::Login
        }
    }
}

/// Install the global subscriber. `RUST_LOG` filters; `info` by default.
/// `log` records are forwarded through the subscriber's log bridge.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
