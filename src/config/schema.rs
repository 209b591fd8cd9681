use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Shared secret callers must present in `x-api-key`.
    pub api_key: Option<String>,

    /// Fixed prefix applied when addressing direct phone-number targets.
    #[serde(default = "default_country_prefix")]
    pub country_prefix: String,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_country_prefix() -> String {
    "91".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Refuse non-loopback binds unless this is set.
    #[serde(default)]
    pub allow_public_bind: bool,
    /// Upper bound on a request body (multipart upload) in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Whole-request timeout. Transport calls carry no internal deadline, so
    /// this is what keeps a stuck dispatch from holding the send lock
    /// forever.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allow_public_bind: false,
            max_upload_bytes: default_max_upload_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which chat backend to wire up. Only `console` is built in; real
    /// backends are provided by embedders.
    #[serde(default = "default_transport_mode")]
    pub mode: String,
}

fn default_transport_mode() -> String {
    "console".into()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: default_transport_mode(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            api_key: None,
            country_prefix: default_country_prefix(),
            gateway: GatewayConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let wagate_dir = home.join(".wagate");
        if !wagate_dir.exists() {
            fs::create_dir_all(&wagate_dir).context("Failed to create .wagate directory")?;
        }
        let config_path = wagate_dir.join("config.toml");

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Config {
                config_path: config_path.clone(),
                ..Config::default()
            };
            config.save()?;
            config
        };
        config.config_path = config_path;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // API key: WAGATE_API_KEY or the classic APIKEY
        if let Ok(key) = std::env::var("WAGATE_API_KEY").or_else(|_| std::env::var("APIKEY")) {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }

        if let Ok(prefix) = std::env::var("WAGATE_COUNTRY_PREFIX") {
            if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
                self.country_prefix = prefix;
            }
        }

        if let Ok(host) = std::env::var("WAGATE_GATEWAY_HOST").or_else(|_| std::env::var("HOST")) {
            if !host.is_empty() {
                self.gateway.host = host;
            }
        }

        if let Ok(port_str) =
            std::env::var("WAGATE_GATEWAY_PORT").or_else(|_| std::env::var("PORT"))
        {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        if let Ok(val) = std::env::var("WAGATE_ALLOW_PUBLIC_BIND") {
            self.gateway.allow_public_bind = val == "1" || val.eq_ignore_ascii_case("true");
        }

        if let Ok(mode) = std::env::var("WAGATE_TRANSPORT") {
            if !mode.is_empty() {
                self.transport.mode = mode;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.config_path, contents)
            .with_context(|| format!("Failed to write {}", self.config_path.display()))?;
        Ok(())
    }
}
