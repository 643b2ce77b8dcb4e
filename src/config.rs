use serde::Deserialize;
use teloxide::types::{ChatId, Recipient};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::bot::telegram::parse_recipient;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MODEL: &str = "gpt-4";
const DEFAULT_MAX_TOKENS: u32 = 200;
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_GRACE_SECS: u64 = 10;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// A required value is absent from both the environment and the file.
    Missing(&'static str),
    /// A value is present but unusable.
    Invalid { var: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Missing(var) => write!(f, "missing required setting {var}"),
            Self::Invalid { var, reason } => write!(f, "invalid value for {var}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Missing(_) | Self::Invalid { .. } => None,
        }
    }
}

/// How updates reach the bot. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployMode {
    /// Telegram pushes to `{base_url}/webhook/<token>`.
    Webhook { base_url: String },
    Polling,
}

impl DeployMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMode::Webhook { .. } => "webhook",
            DeployMode::Polling => "polling",
        }
    }
}

/// `channel_id` in the file may be a number or an `@channelusername`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChannelSetting {
    Id(i64),
    Name(String),
}

/// Optional JSON file. Every key can be overridden from the environment.
#[derive(Deserialize, Default)]
struct ConfigFile {
    bot_token: Option<String>,
    openai_api_key: Option<String>,
    channel_id: Option<ChannelSetting>,
    admin_id: Option<u64>,
    port: Option<u16>,
    mode: Option<String>,
    webhook_url: Option<String>,
    openai_model: Option<String>,
    openai_max_tokens: Option<u32>,
    openai_base_url: Option<String>,
    shutdown_grace_secs: Option<u64>,
    log_dir: Option<String>,
    log_chat_id: Option<i64>,
}

pub struct Config {
    pub bot_token: String,
    pub openai_api_key: String,
    /// Broadcast channel that receives question/answer posts.
    pub channel: Recipient,
    /// The operator allowed to run privileged commands.
    pub admin_id: Option<u64>,
    pub port: u16,
    pub mode: DeployMode,
    pub openai_model: String,
    pub openai_max_tokens: u32,
    pub openai_base_url: String,
    pub shutdown_grace: Duration,
    /// Directory for `askchannel.log`.
    pub log_dir: Option<PathBuf>,
    /// Chat that receives forwarded log lines.
    pub log_chat_id: Option<i64>,
}

impl Config {
    /// Load from the optional file at `path`, then apply the process environment.
    pub fn from_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load(path, |key| std::env::var(key).ok())
    }

    pub fn load<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match path {
            Some(path) => read_file(path)?,
            None => ConfigFile::default(),
        };

        let bot_token = setting(&env, "BOT_TOKEN", file.bot_token)?
            .filter(|s: &String| !s.is_empty())
            .ok_or(ConfigError::Missing("BOT_TOKEN"))?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Invalid {
                var: "BOT_TOKEN",
                reason: "expected format 123456789:ABCdefGHI...".into(),
            });
        }

        let openai_api_key = setting(&env, "OPENAI_API_KEY", file.openai_api_key)?
            .filter(|s: &String| !s.is_empty())
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        let channel = channel_setting(&env, file.channel_id)?.ok_or(ConfigError::Missing("CHANNEL_ID"))?;
        let admin_id = setting(&env, "ADMIN_ID", file.admin_id)?;
        let port = setting(&env, "PORT", file.port)?.unwrap_or(DEFAULT_PORT);

        let webhook_url = setting(&env, "WEBHOOK_URL", file.webhook_url)?
            .filter(|s: &String| !s.is_empty())
            .or_else(|| {
                env("RAILWAY_PUBLIC_DOMAIN")
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .map(|d| format!("https://{d}"))
            })
            .map(|url| url.trim_end_matches('/').to_string());

        let raw_mode = setting::<String, _>(&env, "BOT_MODE", file.mode)?.map(|m| m.to_lowercase());
        let mode = match raw_mode.as_deref() {
            None | Some("polling") | Some("poll") => DeployMode::Polling,
            Some("webhook") => DeployMode::Webhook {
                base_url: webhook_url.ok_or(ConfigError::Missing("WEBHOOK_URL"))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "BOT_MODE",
                    reason: format!("expected 'webhook' or 'polling', got '{other}'"),
                });
            }
        };

        let openai_model =
            setting(&env, "OPENAI_MODEL", file.openai_model)?.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let openai_max_tokens =
            setting(&env, "OPENAI_MAX_TOKENS", file.openai_max_tokens)?.unwrap_or(DEFAULT_MAX_TOKENS);
        let openai_base_url = setting(&env, "OPENAI_BASE_URL", file.openai_base_url)?
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let grace_secs =
            setting(&env, "SHUTDOWN_GRACE_SECS", file.shutdown_grace_secs)?.unwrap_or(DEFAULT_GRACE_SECS);
        let log_dir = setting::<String, _>(&env, "LOG_DIR", file.log_dir)?.map(PathBuf::from);
        let log_chat_id = setting(&env, "LOG_CHAT_ID", file.log_chat_id)?;

        Ok(Self {
            bot_token,
            openai_api_key,
            channel,
            admin_id,
            port,
            mode,
            openai_model,
            openai_max_tokens,
            openai_base_url,
            shutdown_grace: Duration::from_secs(grace_secs),
            log_dir,
            log_chat_id,
        })
    }

    /// Path of the inbound webhook route, suffixed with the bot token.
    pub fn webhook_path(&self) -> String {
        format!("/webhook/{}", self.bot_token)
    }
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFile { path: path.to_path_buf(), source: e })?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::ParseJson { path: path.to_path_buf(), source: e })
}

fn channel_setting<F>(env: &F, file: Option<ChannelSetting>) -> Result<Option<Recipient>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let invalid = |reason| ConfigError::Invalid { var: "CHANNEL_ID", reason };
    match env("CHANNEL_ID").filter(|v| !v.trim().is_empty()) {
        Some(raw) => parse_recipient(&raw).map(Some).map_err(invalid),
        None => match file {
            Some(ChannelSetting::Id(id)) => Ok(Some(Recipient::Id(ChatId(id)))),
            Some(ChannelSetting::Name(name)) => parse_recipient(&name).map(Some).map_err(invalid),
            None => Ok(None),
        },
    }
}

/// Environment value for `var` if set and non-blank, otherwise the file value.
fn setting<T, F>(env: &F, var: &'static str, file: Option<T>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match env(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid { var, reason: e.to_string() }),
        None => Ok(file),
    }
}
