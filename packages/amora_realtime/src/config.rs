use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::connection::ReconnectPolicy;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [realtime]
//                    keepalive_secs = 15
//
//   env var:         AMORA_REALTIME__KEEPALIVE_SECS=15   (double underscore = nesting)

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// host=localhost:8002, ws/http
    Local,
    /// host=dating-appbckend.onrender.com, wss/https
    Production,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown profile '{other}' (expected local or production)")),
        }
    }
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub realtime: RealtimeFileConfig,
    #[serde(default)]
    pub conversation: ConversationFileConfig,
    #[serde(default)]
    pub http: HttpFileConfig,
}

/// Where the messaging server lives (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Use wss/https instead of ws/http
    #[serde(default)]
    pub secure: bool,
    /// REST base URL; derived from host/secure when unset
    #[serde(default)]
    pub api_base_url: Option<String>,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            secure: false,
            api_base_url: None,
        }
    }
}

/// Connection tunables (lives under `[realtime]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeFileConfig {
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Force a reconnect when no pong arrives within this window (0 = disabled)
    #[serde(default)]
    pub pong_timeout_secs: u64,
}

impl Default for RealtimeFileConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            pong_timeout_secs: 0,
        }
    }
}

/// Conversation view tunables (lives under `[conversation]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationFileConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_typing_idle_ms")]
    pub typing_idle_ms: u64,
}

impl Default for ConversationFileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            typing_idle_ms: default_typing_idle_ms(),
        }
    }
}

/// REST client tunables (lives under `[http]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpFileConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpFileConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "localhost:8002".to_string()
}
fn default_keepalive_secs() -> u64 {
    30
}
fn default_reconnect_base_ms() -> u64 {
    1000
}
fn default_reconnect_cap_ms() -> u64 {
    30_000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    3000
}
fn default_typing_idle_ms() -> u64 {
    2000
}
fn default_http_timeout_secs() -> u64 {
    10
}

/// Build a figment that layers: defaults → profile defaults → config.toml → AMORA_* env vars.
///
/// The CLI profile takes priority over the config file profile.
///
/// Env vars use double-underscore for nesting into sections:
///   `AMORA_SERVER__HOST=chat.example.com`  →  `server.host = "chat.example.com"`
///   `AMORA_CONVERSATION__POLL_INTERVAL_MS=5000`  →  `conversation.poll_interval_ms = 5000`
pub fn load_config(data_dir: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    // Pass 1: peek at profile from config.toml/env (CLI overrides file)
    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("AMORA_").split("__"));

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok());

    // Pass 2: rebuild with profile defaults as a layer between defaults and config.toml
    let profile_layer = profile_to_file_config(profile.as_ref());

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_layer))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("AMORA_").split("__"))
}

fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    match profile {
        Some(Profile::Local) => FileConfig {
            profile: Some(Profile::Local),
            server: ServerFileConfig {
                host: default_host(),
                secure: false,
                api_base_url: None,
            },
            ..Default::default()
        },
        Some(Profile::Production) => FileConfig {
            profile: Some(Profile::Production),
            server: ServerFileConfig {
                host: "dating-appbckend.onrender.com".to_string(),
                secure: true,
                api_base_url: None,
            },
            ..Default::default()
        },
        None => FileConfig::default(),
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Resolved server location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub secure: bool,
    pub api_base_url: String,
}

impl ServerEndpoint {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        let api_base_url = fc.api_base_url.clone().unwrap_or_else(|| {
            let scheme = if fc.secure { "https" } else { "http" };
            format!("{scheme}://{}", fc.host)
        });
        Self {
            host: fc.host.clone(),
            secure: fc.secure,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn ws_scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }
}

/// Connection manager settings.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    /// Interval between `ping` frames while open
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectPolicy,
    /// Reconnect when the server stays silent past this window (None = never)
    pub pong_timeout: Option<Duration>,
    /// Capacity of the inbound frame broadcast
    pub frame_broadcast_capacity: usize,
}

impl RealtimeConfig {
    pub fn from_file(fc: &RealtimeFileConfig) -> Self {
        Self {
            keepalive_interval: Duration::from_secs(fc.keepalive_secs.max(1)),
            reconnect: ReconnectPolicy {
                base: Duration::from_millis(fc.reconnect_base_ms),
                cap: Duration::from_millis(fc.reconnect_cap_ms),
                max_attempts: fc.max_reconnect_attempts,
            },
            pong_timeout: if fc.pong_timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.pong_timeout_secs))
            },
            frame_broadcast_capacity: 256,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::from_file(&RealtimeFileConfig::default())
    }
}

/// Conversation view settings.
#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub poll_interval: Duration,
    pub typing_idle: Duration,
}

impl ConversationConfig {
    pub fn from_file(fc: &ConversationFileConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(fc.poll_interval_ms.max(1)),
            typing_idle: Duration::from_millis(fc.typing_idle_ms.max(1)),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self::from_file(&ConversationFileConfig::default())
    }
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct AppDirs {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl AppDirs {
    pub fn new(custom_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "could not find home directory")
                })?
                .join(".amora"),
        };

        std::fs::create_dir_all(&data_dir)?;
        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)?;

        Ok(Self { data_dir, logs_dir })
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
