use serde::{Deserialize, Serialize};
use std::{env, fmt, fs, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10/";
const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Three hours, expressed in milliseconds.
pub const DEFAULT_MESSAGE_TTL_MS: u64 = 10_800_000;

/// Errors raised while resolving the bot configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The configuration file extension is neither yaml nor json.
    #[error("Unsupported configuration format for {path}. Use 'yaml' or 'json'.")]
    UnsupportedFormat { path: PathBuf },

    /// An environment variable carried a value that could not be parsed.
    #[error("Invalid {name} value: {message}")]
    InvalidEnv { name: &'static str, message: String },

    /// The resolved configuration failed validation.
    #[error("invalid configuration: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },
}

/// Output format of the log sink.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, ANSI coloured lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected 'text' or 'json'")),
        }
    }
}

/// Logging settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Bounds applied to the 429 retry loop.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum number of rate-limited attempts per call. Zero retries forever.
    pub max_attempts: u32,
    /// Upper bound on a single server-requested wait, in seconds.
    pub max_retry_after_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            max_retry_after_secs: 300,
        }
    }
}

/// The main configuration structure for the Ephemera bot.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Bot token used for both the gateway identify and REST calls.
    pub token: String,

    /// Watched channels, in backfill order.
    pub channel_ids: Vec<String>,

    /// Message time-to-live in milliseconds.
    pub message_ttl_ms: u64,

    /// REST API root, with a trailing slash.
    pub api_base_url: Url,

    /// Gateway websocket endpoint.
    pub gateway_url: Url,

    /// Messages requested per backfill page.
    pub page_size: u8,

    /// Rate limit retry bounds.
    pub rate_limit: RateLimitConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("channel_ids", &self.channel_ids)
            .field("message_ttl_ms", &self.message_ttl_ms)
            .field("api_base_url", &self.api_base_url.as_str())
            .field("gateway_url", &self.gateway_url.as_str())
            .field("page_size", &self.page_size)
            .field("rate_limit", &self.rate_limit)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Values supplied on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Replaces `message_ttl_ms` when set.
    pub message_ttl_ms: Option<u64>,
    /// Replaces `channel_ids` when non-empty.
    pub channel_ids: Vec<String>,
}

impl Config {
    /// Generates a default configuration.
    ///
    /// # Panics
    /// Never; the built-in URLs are constant and valid.
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn with_defaults() -> Self {
        Self {
            token: String::new(),
            channel_ids: Vec::new(),
            message_ttl_ms: DEFAULT_MESSAGE_TTL_MS,
            api_base_url: Url::parse(DEFAULT_API_BASE_URL).expect("default API URL is valid"),
            gateway_url: Url::parse(DEFAULT_GATEWAY_URL).expect("default gateway URL is valid"),
            page_size: 100,
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// The configured TTL as a [`Duration`].
    #[must_use]
    pub fn message_ttl(&self) -> Duration {
        Duration::from_millis(self.message_ttl_ms)
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a yaml or json configuration file.
    /// * `overrides` - Command-line values applied last.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, an
    /// environment variable is malformed, or the result fails validation.
    pub fn load_config(
        config_path: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Config::with_defaults(),
        };

        config.apply_env_overrides()?;

        if let Some(ttl) = overrides.message_ttl_ms {
            config.message_ttl_ms = ttl;
        }
        if !overrides.channel_ids.is_empty() {
            config.channel_ids = overrides.channel_ids;
        }

        config
            .validate()
            .map_err(|errors| ConfigError::Invalid { errors })?;

        tracing::debug!(config = ?config, "configuration resolved");
        Ok(config)
    }

    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => {
                serde_yml::from_str(&content).map_err(|err| ConfigError::Parse {
                    path,
                    message: err.to_string(),
                })
            }
            Some("json") => serde_json::from_str(&content).map_err(|err| ConfigError::Parse {
                path,
                message: err.to_string(),
            }),
            _ => Err(ConfigError::UnsupportedFormat { path }),
        }
    }

    /// Environment variables only fill values still at their default.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let defaults = Config::with_defaults();

        if self.token == defaults.token {
            if let Ok(token) = env::var("EPHEMERA_TOKEN") {
                self.token = token.trim().to_string();
            }
        }
        if self.channel_ids == defaults.channel_ids {
            if let Ok(ids) = env::var("EPHEMERA_CHANNEL_IDS") {
                self.channel_ids = parse_channel_list(&ids);
            }
        }
        if self.message_ttl_ms == defaults.message_ttl_ms {
            if let Ok(ttl) = env::var("EPHEMERA_MESSAGE_TTL_MS") {
                self.message_ttl_ms =
                    ttl.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                        name: "EPHEMERA_MESSAGE_TTL_MS",
                        message: "must be a whole number of milliseconds".to_string(),
                    })?;
            }
        }
        if self.api_base_url == defaults.api_base_url {
            if let Ok(url) = env::var("EPHEMERA_API_BASE_URL") {
                self.api_base_url = parse_url("EPHEMERA_API_BASE_URL", &url)?;
            }
        }
        if self.gateway_url == defaults.gateway_url {
            if let Ok(url) = env::var("EPHEMERA_GATEWAY_URL") {
                self.gateway_url = parse_url("EPHEMERA_GATEWAY_URL", &url)?;
            }
        }
        if self.logging.level == defaults.logging.level {
            if let Ok(level) = env::var("EPHEMERA_LOG_LEVEL") {
                self.logging.level = level;
            }
        }
        if self.logging.format == defaults.logging.format {
            if let Ok(format) = env::var("EPHEMERA_LOG_FORMAT") {
                self.logging.format = format
                    .parse()
                    .map_err(|message| ConfigError::InvalidEnv {
                        name: "EPHEMERA_LOG_FORMAT",
                        message,
                    })?;
            }
        }

        Ok(())
    }

    /// Validate the complete configuration.
    ///
    /// # Errors
    /// Returns every validation failure found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.token.trim().is_empty() {
            errors.push("Bot token must not be empty.".to_string());
        }
        if self.channel_ids.is_empty() {
            errors.push("At least one channel id must be configured.".to_string());
        }
        if self.channel_ids.iter().any(|id| id.trim().is_empty()) {
            errors.push("Channel ids must not be blank.".to_string());
        }
        if self.message_ttl_ms == 0 {
            errors.push("Message TTL must be greater than 0.".to_string());
        }
        if !(1..=100).contains(&self.page_size) {
            errors.push("Page size must be between 1 and 100.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Splits a comma separated channel list, dropping blanks.
#[must_use]
pub fn parse_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidEnv {
        name,
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VARS: [&str; 7] = [
        "EPHEMERA_TOKEN",
        "EPHEMERA_CHANNEL_IDS",
        "EPHEMERA_MESSAGE_TTL_MS",
        "EPHEMERA_API_BASE_URL",
        "EPHEMERA_GATEWAY_URL",
        "EPHEMERA_LOG_LEVEL",
        "EPHEMERA_LOG_FORMAT",
    ];

    fn cleanup_env_vars() {
        for name in ENV_VARS {
            unsafe {
                std::env::remove_var(name);
            }
        }
    }

    fn set_required_env() {
        unsafe {
            std::env::set_var("EPHEMERA_TOKEN", "env-token");
            std::env::set_var("EPHEMERA_CHANNEL_IDS", "100, 200");
        }
    }

    #[test]
    fn test_config_with_defaults() {
        let config = Config::with_defaults();

        assert!(config.token.is_empty());
        assert!(config.channel_ids.is_empty());
        assert_eq!(config.message_ttl_ms, 10_800_000);
        assert_eq!(config.message_ttl(), Duration::from_secs(3 * 60 * 60));
        assert_eq!(config.api_base_url.as_str(), "https://discord.com/api/v10/");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.rate_limit.max_attempts, 8);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    #[serial]
    fn test_load_config_from_environment() {
        cleanup_env_vars();
        set_required_env();
        unsafe {
            std::env::set_var("EPHEMERA_MESSAGE_TTL_MS", "60000");
            std::env::set_var("EPHEMERA_LOG_LEVEL", "debug");
            std::env::set_var("EPHEMERA_LOG_FORMAT", "JSON");
        }

        let config = Config::load_config(None, ConfigOverrides::default()).unwrap();

        assert_eq!(config.token, "env-token");
        assert_eq!(config.channel_ids, vec!["100".to_string(), "200".to_string()]);
        assert_eq!(config.message_ttl_ms, 60_000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_load_config_missing_token_and_channels() {
        cleanup_env_vars();

        let err = Config::load_config(None, ConfigOverrides::default()).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("Bot token must not be empty"));
        assert!(message.contains("At least one channel id"));
    }

    #[test]
    #[serial]
    fn test_load_config_invalid_ttl_environment() {
        cleanup_env_vars();
        set_required_env();
        unsafe {
            std::env::set_var("EPHEMERA_MESSAGE_TTL_MS", "three hours");
        }

        let result = Config::load_config(None, ConfigOverrides::default());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid EPHEMERA_MESSAGE_TTL_MS")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_overrides_take_precedence() {
        cleanup_env_vars();
        set_required_env();
        unsafe {
            std::env::set_var("EPHEMERA_MESSAGE_TTL_MS", "5000");
        }

        let overrides = ConfigOverrides {
            message_ttl_ms: Some(7000),
            channel_ids: vec!["300".to_string()],
        };
        let config = Config::load_config(None, overrides).unwrap();

        assert_eq!(config.message_ttl_ms, 7000);
        assert_eq!(config.channel_ids, vec!["300".to_string()]);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_load_config_from_yaml_file() -> Result<(), Box<dyn std::error::Error>> {
        cleanup_env_vars();
        let temp_dir = TempDir::new()?;
        let config_file = temp_dir.path().join("ephemera.yaml");

        let yaml_content = r#"
token: "yaml-token"
channel_ids: ["111", "222", "333"]
message_ttl_ms: 3600000
page_size: 50
rate_limit:
  max_attempts: 0
  max_retry_after_secs: 30
logging:
  level: "trace"
  format: "json"
"#;
        fs::write(&config_file, yaml_content)?;

        let config = Config::load_config(Some(config_file), ConfigOverrides::default())?;

        assert_eq!(config.token, "yaml-token");
        assert_eq!(config.channel_ids.len(), 3);
        assert_eq!(config.message_ttl_ms, 3_600_000);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.rate_limit.max_attempts, 0);
        assert_eq!(config.rate_limit.max_retry_after_secs, 30);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, LogFormat::Json);
        // Fields absent from the file keep their defaults.
        assert_eq!(config.api_base_url.as_str(), DEFAULT_API_BASE_URL);

        Ok(())
    }

    #[test]
    #[serial]
    fn test_load_config_from_json_file() -> Result<(), Box<dyn std::error::Error>> {
        cleanup_env_vars();
        let temp_dir = TempDir::new()?;
        let config_file = temp_dir.path().join("ephemera.json");

        let json_content = r#"
{
  "token": "json-token",
  "channel_ids": ["42"],
  "api_base_url": "http://127.0.0.1:9000/api/",
  "gateway_url": "ws://127.0.0.1:9001/"
}
"#;
        fs::write(&config_file, json_content)?;

        let config = Config::load_config(Some(config_file), ConfigOverrides::default())?;

        assert_eq!(config.token, "json-token");
        assert_eq!(config.channel_ids, vec!["42".to_string()]);
        assert_eq!(config.api_base_url.as_str(), "http://127.0.0.1:9000/api/");
        assert_eq!(config.gateway_url.as_str(), "ws://127.0.0.1:9001/");
        assert_eq!(config.message_ttl_ms, DEFAULT_MESSAGE_TTL_MS);

        Ok(())
    }

    #[test]
    #[serial]
    fn test_file_values_win_over_environment() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("priority.yaml");
        fs::write(&config_file, "token: file-token\nchannel_ids: [\"1\"]\n").unwrap();

        set_required_env();

        let config = Config::load_config(Some(config_file), ConfigOverrides::default()).unwrap();

        assert_eq!(config.token, "file-token");
        assert_eq!(config.channel_ids, vec!["1".to_string()]);

        cleanup_env_vars();
    }

    #[test]
    fn test_load_config_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("ephemera.toml");
        fs::write(&config_file, "token = \"x\"").unwrap();

        let result = Config::load_config(Some(config_file), ConfigOverrides::default());
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_load_config_nonexistent_file() {
        let result = Config::load_config(
            Some(PathBuf::from("/nonexistent/ephemera.yaml")),
            ConfigOverrides::default(),
        );
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_config_malformed_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("bad.yaml");
        fs::write(&config_file, "channel_ids: [unterminated").unwrap();

        let result = Config::load_config(Some(config_file), ConfigOverrides::default());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_ttl_and_bad_page_size() {
        let mut config = Config::with_defaults();
        config.token = "t".to_string();
        config.channel_ids = vec!["1".to_string()];
        config.message_ttl_ms = 0;
        config.page_size = 0;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Message TTL")));
        assert!(errors.iter().any(|e| e.contains("Page size")));
    }

    #[test]
    fn test_parse_channel_list_trims_and_drops_blanks() {
        assert_eq!(
            parse_channel_list(" 1 ,2,, 3 ,"),
            vec!["1".to_string(), "2".to_string(), "3".to_string()]
        );
        assert!(parse_channel_list("").is_empty());
    }

    #[test]
    fn test_debug_redacts_token() {
        let mut config = Config::with_defaults();
        config.token = "super-secret".to_string();

        let debug_str = format!("{config:?}");
        assert!(debug_str.contains("Config"));
        assert!(debug_str.contains("<redacted>"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::with_defaults();

        let json_str = serde_json::to_string(&config).unwrap();
        let from_json: Config = serde_json::from_str(&json_str).unwrap();
        assert_eq!(config, from_json);

        let yaml_str = serde_yml::to_string(&config).unwrap();
        let from_yaml: Config = serde_yml::from_str(&yaml_str).unwrap();
        assert_eq!(config, from_yaml);
    }
}
