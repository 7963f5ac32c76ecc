use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use tireline_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// Renders the effective configuration, one `key = value (source: ...)`
/// line per setting. Secrets are redacted.
pub fn run(options: LoadOptions) -> String {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(explicit_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value) in effective_values(&config) {
        let source = field_source(
            key,
            &env_key(key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    let notifications = &config.notifications;
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("quotes.tax_rate", config.quotes.tax_rate.to_string()),
        ("quotes.currency", config.quotes.currency.clone()),
        ("quotes.default_valid_days", config.quotes.default_valid_days.to_string()),
        ("quotes.expiry_sweep_secs", config.quotes.expiry_sweep_secs.to_string()),
        ("notifications.provider", format!("{:?}", notifications.provider)),
        ("notifications.endpoint", notifications.endpoint.clone().unwrap_or_else(unset)),
        (
            "notifications.api_key",
            notifications
                .api_key
                .as_ref()
                .map(|key| redact_secret(key.expose_secret()))
                .unwrap_or_else(unset),
        ),
        ("notifications.from_address", notifications.from_address.clone()),
        ("notifications.timeout_secs", notifications.timeout_secs.to_string()),
        ("auth.session_secret", redact_secret(config.auth.session_secret.expose_secret())),
        ("auth.session_ttl_hours", config.auth.session_ttl_hours.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ]
}

fn unset() -> String {
    "<unset>".to_string()
}

fn env_key(key_path: &str) -> String {
    format!("TIRELINE_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then_some(path);
    }

    ["tireline.toml", "config/tireline.toml"].into_iter().map(PathBuf::from).find(|p| p.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    format!("<redacted:{} chars>", trimmed.chars().count())
}
