use crate::chat::DEFAULT_TIP_PATTERN;
use crate::reactions::{PacingPolicy, ReactionTable};
use crate::sequencer::DEFAULT_COMMAND_DELAY;
use regex::Regex;
use relay_core::pubsub_ipc::DEFAULT_PUBSUB_URL;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "configs/relay.yaml";
pub const DEFAULT_CHAT_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub pubsub: PubSubConfig,
    pub rcon: RconConfig,
    pub game: GameConfig,
    pub chat: ChatConfig,
    pub pacing: PacingPolicy,
    pub reactions: ReactionTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    pub url: String,
    pub channel_id: String,
    pub auth_token: String,
    pub connect_timeout_secs: u64,
    pub ack_timeout_secs: u64,
    pub ack_retries: u32,
    pub ping_interval_secs: u64,
    pub pong_grace_secs: u64,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PUBSUB_URL.to_string(),
            channel_id: String::new(),
            auth_token: String::new(),
            connect_timeout_secs: 10,
            ack_timeout_secs: 10,
            ack_retries: 3,
            ping_interval_secs: 270,
            pong_grace_secs: 5,
            backoff_initial_secs: 1,
            backoff_max_secs: 120,
        }
    }
}

impl PubSubConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RconConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
    pub command_delay_ms: u64,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25575,
            password: String::new(),
            connect_timeout_secs: 5,
            io_timeout_secs: 5,
            command_delay_ms: DEFAULT_COMMAND_DELAY.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Server version tag; logged at startup.
    pub mc_version: String,
    /// Active feature modes; rules with `requires_mode` only fire when listed.
    pub modes: Vec<String>,
    pub player: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            mc_version: String::new(),
            modes: Vec::new(),
            player: "@p".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub enabled: bool,
    pub url: String,
    pub nick: String,
    pub token: String,
    pub channel: String,
    pub bot_authors: Vec<String>,
    pub tip_pattern: String,
    pub queue_capacity: usize,
    pub connect_timeout_secs: u64,
    /// Reconnect when nothing arrives for this long. The server pings about
    /// every five minutes.
    pub read_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: DEFAULT_CHAT_URL.to_string(),
            nick: String::new(),
            token: String::new(),
            channel: String::new(),
            bot_authors: vec!["streamlabs".to_string(), "yoghurtbot".to_string()],
            tip_pattern: DEFAULT_TIP_PATTERN.to_string(),
            queue_capacity: 64,
            connect_timeout_secs: 10,
            read_timeout_secs: 360,
        }
    }
}

impl RelayConfig {
    /// Reads `path`, applies environment secrets and validates the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    /// Non-empty values from the environment win over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(value) = read("RELAY_AUTH_TOKEN") {
            self.pubsub.auth_token = value;
        }
        if let Some(value) = read("RELAY_RCON_PASSWORD") {
            self.rcon.password = value;
        }
        if let Some(value) = read("RELAY_CHAT_TOKEN") {
            self.chat.token = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };
        let pubsub = &self.pubsub;
        if pubsub.channel_id.trim().is_empty() {
            return invalid("pubsub.channel_id is required");
        }
        if pubsub.auth_token.trim().is_empty() {
            return invalid("pubsub.auth_token is required (or RELAY_AUTH_TOKEN)");
        }
        if pubsub.ping_interval_secs == 0 || pubsub.pong_grace_secs == 0 {
            return invalid("pubsub keepalive intervals must be positive");
        }
        if pubsub.ack_timeout_secs == 0 || pubsub.connect_timeout_secs == 0 {
            return invalid("pubsub timeouts must be positive");
        }
        if pubsub.backoff_initial_secs == 0 {
            return invalid("pubsub.backoff_initial_secs must be positive");
        }
        check_ws_url("pubsub.url", &pubsub.url)?;
        if self.rcon.port == 0 {
            return invalid("rcon.port must be set");
        }
        if self.rcon.connect_timeout_secs == 0 || self.rcon.io_timeout_secs == 0 {
            return invalid("rcon timeouts must be positive");
        }
        let chat = &self.chat;
        if chat.enabled {
            if chat.nick.trim().is_empty()
                || chat.token.trim().is_empty()
                || chat.channel.trim().is_empty()
            {
                return invalid("chat.nick, chat.token and chat.channel are required");
            }
            if chat.queue_capacity == 0 {
                return invalid("chat.queue_capacity must be positive");
            }
            if chat.connect_timeout_secs == 0 || chat.read_timeout_secs == 0 {
                return invalid("chat timeouts must be positive");
            }
            check_ws_url("chat.url", &chat.url)?;
        }
        if let Err(err) = Regex::new(&chat.tip_pattern) {
            return Err(ConfigError::Invalid(format!("chat.tip_pattern: {err}")));
        }
        Ok(())
    }
}

fn check_ws_url(field: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw).map_err(|err| ConfigError::Invalid(format!("{field}: {err}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{field}: unsupported scheme {other}"
        ))),
    }
}
