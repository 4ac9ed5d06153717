use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ravenrock_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: Vec<(&str, String, Option<&str>)> = vec![
        ("database.url", redact_url(&config.database.url), Some("RAVENROCK_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("RAVENROCK_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("RAVENROCK_DATABASE_TIMEOUT_SECS"),
        ),
        ("server.bind_address", config.server.bind_address.clone(), Some("RAVENROCK_SERVER_BIND_ADDRESS")),
        ("server.port", config.server.port.to_string(), Some("RAVENROCK_SERVER_PORT")),
        ("server.proxy_prefix", config.server.proxy_prefix.clone(), Some("RAVENROCK_SERVER_PROXY_PREFIX")),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            Some("RAVENROCK_SERVER_GRACEFUL_SHUTDOWN_SECS"),
        ),
        (
            "selection.overfetch_factor",
            config.selection.overfetch_factor.to_string(),
            Some("RAVENROCK_SELECTION_OVERFETCH_FACTOR"),
        ),
        (
            "selection.pool_ceiling",
            config.selection.pool_ceiling.to_string(),
            Some("RAVENROCK_SELECTION_POOL_CEILING"),
        ),
        ("selection.collection_products", config.selection.collection_products.to_string(), None),
        ("selection.variants_per_product", config.selection.variants_per_product.to_string(), None),
        (
            "widget.frequency_hours",
            config.widget.frequency_hours.to_string(),
            Some("RAVENROCK_WIDGET_FREQUENCY_HOURS"),
        ),
        (
            "widget.upsell_delay_secs",
            config.widget.upsell_delay_secs.to_string(),
            Some("RAVENROCK_WIDGET_UPSELL_DELAY_SECS"),
        ),
        ("widget.auto_open", config.widget.auto_open.to_string(), Some("RAVENROCK_WIDGET_AUTO_OPEN")),
        (
            "widget.default_locale",
            config.widget.default_locale.clone(),
            Some("RAVENROCK_WIDGET_DEFAULT_LOCALE"),
        ),
        (
            "widget.request_timeout_ms",
            config.widget.request_timeout_ms.to_string(),
            Some("RAVENROCK_WIDGET_REQUEST_TIMEOUT_MS"),
        ),
        ("logging.level", config.logging.level.clone(), Some("RAVENROCK_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("RAVENROCK_LOGGING_FORMAT")),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in fields {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("ravenrock.toml"), PathBuf::from("config/ravenrock.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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

/// Hides credentials embedded as `user:password@` in a connection URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_url};

    #[test]
    fn credentials_in_urls_are_hidden() {
        assert_eq!(redact_url("postgres://app:secret@db:5432/rr"), "postgres://***@db:5432/rr");
        assert_eq!(redact_url("sqlite://ravenrock.db"), "sqlite://ravenrock.db");
        assert_eq!(redact_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[test]
    fn nested_keys_are_found_in_file_doc() {
        let doc: toml::Value = "[widget]\nfrequency_hours = 6\n".parse().expect("toml");

        assert!(contains_path(&doc, "widget.frequency_hours"));
        assert!(!contains_path(&doc, "widget.auto_open"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
