use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub quotes: QuotesConfig,
    pub notifications: NotificationConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct QuotesConfig {
    pub tax_rate: Decimal,
    pub currency: String,
    pub default_valid_days: u32,
    /// Interval of the background expiry sweep; `0` disables it.
    pub expiry_sweep_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub provider: NotificationProvider,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub from_address: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub session_secret: SecretString,
    pub session_ttl_hours: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationProvider {
    Log,
    Http,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub notification_provider: Option<NotificationProvider>,
    pub session_secret: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tireline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            quotes: QuotesConfig {
                tax_rate: Decimal::new(21, 2),
                currency: "EUR".to_string(),
                default_valid_days: 30,
                expiry_sweep_secs: 300,
            },
            notifications: NotificationConfig {
                provider: NotificationProvider::Log,
                endpoint: None,
                api_key: None,
                from_address: "quotes@tireline.local".to_string(),
                timeout_secs: 10,
            },
            auth: AuthConfig { session_secret: String::new().into(), session_ttl_hours: 12 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for NotificationProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::Validation(format!(
                "unsupported notification provider `{other}` (expected log|http)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tireline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// `host:port` the HTTP server binds to.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(quotes) = patch.quotes {
            if let Some(tax_rate) = quotes.tax_rate {
                self.quotes.tax_rate = tax_rate;
            }
            if let Some(currency) = quotes.currency {
                self.quotes.currency = currency;
            }
            if let Some(default_valid_days) = quotes.default_valid_days {
                self.quotes.default_valid_days = default_valid_days;
            }
            if let Some(expiry_sweep_secs) = quotes.expiry_sweep_secs {
                self.quotes.expiry_sweep_secs = expiry_sweep_secs;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(provider) = notifications.provider {
                self.notifications.provider = provider;
            }
            if let Some(endpoint) = notifications.endpoint {
                self.notifications.endpoint = Some(endpoint);
            }
            if let Some(api_key) = notifications.api_key {
                self.notifications.api_key = Some(secret_value(api_key));
            }
            if let Some(from_address) = notifications.from_address {
                self.notifications.from_address = from_address;
            }
            if let Some(timeout_secs) = notifications.timeout_secs {
                self.notifications.timeout_secs = timeout_secs;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(session_secret) = auth.session_secret {
                self.auth.session_secret = secret_value(session_secret);
            }
            if let Some(session_ttl_hours) = auth.session_ttl_hours {
                self.auth.session_ttl_hours = session_ttl_hours;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TIRELINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TIRELINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TIRELINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TIRELINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TIRELINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TIRELINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TIRELINE_SERVER_PORT") {
            self.server.port = parse_u16("TIRELINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TIRELINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TIRELINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("TIRELINE_QUOTES_TAX_RATE") {
            self.quotes.tax_rate = parse_decimal("TIRELINE_QUOTES_TAX_RATE", &value)?;
        }
        if let Some(value) = read_env("TIRELINE_QUOTES_CURRENCY") {
            self.quotes.currency = value;
        }
        if let Some(value) = read_env("TIRELINE_QUOTES_DEFAULT_VALID_DAYS") {
            self.quotes.default_valid_days =
                parse_u32("TIRELINE_QUOTES_DEFAULT_VALID_DAYS", &value)?;
        }
        if let Some(value) = read_env("TIRELINE_QUOTES_EXPIRY_SWEEP_SECS") {
            self.quotes.expiry_sweep_secs =
                parse_u64("TIRELINE_QUOTES_EXPIRY_SWEEP_SECS", &value)?;
        }

        if let Some(value) = read_env("TIRELINE_NOTIFICATIONS_PROVIDER") {
            self.notifications.provider = value.parse()?;
        }
        if let Some(value) = read_env("TIRELINE_NOTIFICATIONS_ENDPOINT") {
            self.notifications.endpoint = Some(value);
        }
        if let Some(value) = read_env("TIRELINE_NOTIFICATIONS_API_KEY") {
            self.notifications.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TIRELINE_NOTIFICATIONS_FROM_ADDRESS") {
            self.notifications.from_address = value;
        }
        if let Some(value) = read_env("TIRELINE_NOTIFICATIONS_TIMEOUT_SECS") {
            self.notifications.timeout_secs =
                parse_u64("TIRELINE_NOTIFICATIONS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TIRELINE_AUTH_SESSION_SECRET") {
            self.auth.session_secret = secret_value(value);
        }
        if let Some(value) = read_env("TIRELINE_AUTH_SESSION_TTL_HOURS") {
            self.auth.session_ttl_hours = parse_u32("TIRELINE_AUTH_SESSION_TTL_HOURS", &value)?;
        }

        let log_level =
            read_env("TIRELINE_LOGGING_LEVEL").or_else(|| read_env("TIRELINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TIRELINE_LOGGING_FORMAT").or_else(|| read_env("TIRELINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(provider) = overrides.notification_provider {
            self.notifications.provider = provider;
        }
        if let Some(session_secret) = overrides.session_secret {
            self.auth.session_secret = secret_value(session_secret);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_quotes(&self.quotes)?;
        validate_notifications(&self.notifications)?;
        validate_auth(&self.auth)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tireline.toml"), PathBuf::from("config/tireline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_quotes(quotes: &QuotesConfig) -> Result<(), ConfigError> {
    if quotes.tax_rate < Decimal::ZERO || quotes.tax_rate >= Decimal::ONE {
        return Err(ConfigError::Validation(
            "quotes.tax_rate must be a fraction in range 0..1 (e.g. 0.21)".to_string(),
        ));
    }

    let currency = quotes.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(
            "quotes.currency must be a three-letter ISO 4217 code such as `EUR`".to_string(),
        ));
    }

    if quotes.default_valid_days == 0 || quotes.default_valid_days > 365 {
        return Err(ConfigError::Validation(
            "quotes.default_valid_days must be in range 1..=365".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifications(notifications: &NotificationConfig) -> Result<(), ConfigError> {
    if !notifications.from_address.contains('@') {
        return Err(ConfigError::Validation(
            "notifications.from_address must be an e-mail address".to_string(),
        ));
    }

    if notifications.timeout_secs == 0 || notifications.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "notifications.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if notifications.provider == NotificationProvider::Http {
        let endpoint = notifications.endpoint.as_deref().map(str::trim).unwrap_or_default();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notifications.endpoint must be an http(s) URL when provider is `http`"
                    .to_string(),
            ));
        }

        let missing_key = notifications
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "notifications.api_key is required when provider is `http`".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let secret = auth.session_secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "auth.session_secret is required. Set TIRELINE_AUTH_SESSION_SECRET to a random string of at least 32 characters".to_string(),
        ));
    }
    if secret.len() < MIN_SESSION_SECRET_LEN {
        return Err(ConfigError::Validation(format!(
            "auth.session_secret must be at least {MIN_SESSION_SECRET_LEN} characters long"
        )));
    }

    if auth.session_ttl_hours == 0 || auth.session_ttl_hours > 24 * 30 {
        return Err(ConfigError::Validation(
            "auth.session_ttl_hours must be in range 1..=720".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    quotes: Option<QuotesPatch>,
    notifications: Option<NotificationsPatch>,
    auth: Option<AuthPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotesPatch {
    tax_rate: Option<Decimal>,
    currency: Option<String>,
    default_valid_days: Option<u32>,
    expiry_sweep_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationsPatch {
    provider: Option<NotificationProvider>,
    endpoint: Option<String>,
    api_key: Option<String>,
    from_address: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    session_secret: Option<String>,
    session_ttl_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, NotificationProvider,
    };

    const SECRET: &str = "test-session-secret-with-enough-length";

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TIRELINE_SECRET", SECRET);
        env::set_var("TEST_TIRELINE_MAIL_KEY", "mail-key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tireline.toml");
            fs::write(
                &path,
                r#"
[auth]
session_secret = "${TEST_TIRELINE_SECRET}"

[notifications]
provider = "http"
endpoint = "https://mail.example.test/v1/send"
api_key = "${TEST_TIRELINE_MAIL_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.auth.session_secret.expose_secret() == SECRET,
                "session secret should be loaded from environment",
            )?;
            ensure(
                config
                    .notifications
                    .api_key
                    .as_ref()
                    .is_some_and(|key| key.expose_secret() == "mail-key-from-env"),
                "mail api key should be loaded from environment",
            )?;
            ensure(
                config.notifications.provider == NotificationProvider::Http,
                "provider should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_TIRELINE_SECRET", "TEST_TIRELINE_MAIL_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIRELINE_AUTH_SESSION_SECRET", SECRET);
        env::set_var("TIRELINE_LOG_LEVEL", "warn");
        env::set_var("TIRELINE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["TIRELINE_AUTH_SESSION_SECRET", "TIRELINE_LOG_LEVEL", "TIRELINE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIRELINE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("TIRELINE_QUOTES_TAX_RATE", "0.10");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tireline.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[quotes]
tax_rate = "0.19"
currency = "USD"
default_valid_days = 14

[auth]
session_secret = "file-session-secret-that-is-long-enough"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.quotes.tax_rate == Decimal::new(10, 2),
                "env tax rate should win over file and defaults",
            )?;
            ensure(config.quotes.currency == "USD", "file currency should win over defaults")?;
            ensure(config.quotes.default_valid_days == 14, "file validity should be applied")?;
            Ok(())
        })();

        clear_vars(&["TIRELINE_DATABASE_URL", "TIRELINE_QUOTES_TAX_RATE"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIRELINE_AUTH_SESSION_SECRET", "short");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("auth.session_secret")
            );
            ensure(has_message, "validation failure should mention auth.session_secret")
        })();

        clear_vars(&["TIRELINE_AUTH_SESSION_SECRET"]);
        result
    }

    #[test]
    fn http_provider_requires_endpoint_and_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIRELINE_AUTH_SESSION_SECRET", SECRET);
        env::set_var("TIRELINE_NOTIFICATIONS_PROVIDER", "http");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("http provider without endpoint should fail".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message) if message.contains("notifications.endpoint")
                ),
                "validation failure should mention notifications.endpoint",
            )
        })();

        clear_vars(&["TIRELINE_AUTH_SESSION_SECRET", "TIRELINE_NOTIFICATIONS_PROVIDER"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIRELINE_AUTH_SESSION_SECRET", SECRET);
        env::set_var("TIRELINE_SERVER_PORT", "eighty");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("non-numeric port should fail".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. } if key == "TIRELINE_SERVER_PORT"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["TIRELINE_AUTH_SESSION_SECRET", "TIRELINE_SERVER_PORT"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TIRELINE_AUTH_SESSION_SECRET", SECRET);
        env::set_var("TIRELINE_NOTIFICATIONS_API_KEY", "mail-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains(SECRET), "debug output should not contain session secret")?;
            ensure(
                !debug.contains("mail-secret-value"),
                "debug output should not contain mail api key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            ensure(config.listen_address() == "127.0.0.1:8080", "default listen address")?;
            Ok(())
        })();

        clear_vars(&["TIRELINE_AUTH_SESSION_SECRET", "TIRELINE_NOTIFICATIONS_API_KEY"]);
        result
    }
}
