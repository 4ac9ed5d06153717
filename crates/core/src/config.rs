use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::shop::MAX_RESULT_LIMIT;
use crate::proxy::{WidgetDefaults, DEFAULT_FREQUENCY_HOURS, DEFAULT_LOCALE, DEFAULT_UPSELL_DELAY_SECS};
use crate::selection::{
    SelectionPolicy, DEFAULT_COLLECTION_PRODUCTS, DEFAULT_OVERFETCH_FACTOR, DEFAULT_POOL_CEILING,
    DEFAULT_VARIANTS_PER_PRODUCT,
};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub selection: SelectionConfig,
    pub widget: WidgetConfig,
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
    /// Mount point of the storefront proxy routes, e.g. `/apps/ravenrock`.
    pub proxy_prefix: String,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SelectionConfig {
    pub overfetch_factor: usize,
    pub pool_ceiling: usize,
    pub collection_products: usize,
    pub variants_per_product: usize,
}

#[derive(Clone, Debug)]
pub struct WidgetConfig {
    pub frequency_hours: u32,
    pub upsell_delay_secs: u32,
    pub auto_open: bool,
    pub default_locale: String,
    pub request_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub proxy_prefix: Option<String>,
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
                url: "sqlite://ravenrock.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                proxy_prefix: "/apps/ravenrock".to_string(),
                graceful_shutdown_secs: 15,
            },
            selection: SelectionConfig {
                overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
                pool_ceiling: DEFAULT_POOL_CEILING,
                collection_products: DEFAULT_COLLECTION_PRODUCTS,
                variants_per_product: DEFAULT_VARIANTS_PER_PRODUCT,
            },
            widget: WidgetConfig {
                frequency_hours: DEFAULT_FREQUENCY_HOURS,
                upsell_delay_secs: DEFAULT_UPSELL_DELAY_SECS,
                auto_open: true,
                default_locale: DEFAULT_LOCALE.to_string(),
                request_timeout_ms: 2_000,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
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

impl SelectionConfig {
    pub fn policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            overfetch_factor: self.overfetch_factor,
            pool_ceiling: self.pool_ceiling,
            collection_products: self.collection_products,
            variants_per_product: self.variants_per_product,
        }
    }
}

impl WidgetConfig {
    pub fn defaults(&self) -> WidgetDefaults {
        WidgetDefaults {
            frequency_hours: self.frequency_hours,
            upsell_delay_secs: self.upsell_delay_secs,
            auto_open: self.auto_open,
            default_locale: self.default_locale.clone(),
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("ravenrock.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.server.proxy_prefix = normalize_prefix(&config.server.proxy_prefix);
        config.validate()?;

        Ok(config)
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
            if let Some(proxy_prefix) = server.proxy_prefix {
                self.server.proxy_prefix = proxy_prefix;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(selection) = patch.selection {
            if let Some(overfetch_factor) = selection.overfetch_factor {
                self.selection.overfetch_factor = overfetch_factor;
            }
            if let Some(pool_ceiling) = selection.pool_ceiling {
                self.selection.pool_ceiling = pool_ceiling;
            }
            if let Some(collection_products) = selection.collection_products {
                self.selection.collection_products = collection_products;
            }
            if let Some(variants_per_product) = selection.variants_per_product {
                self.selection.variants_per_product = variants_per_product;
            }
        }

        if let Some(widget) = patch.widget {
            if let Some(frequency_hours) = widget.frequency_hours {
                self.widget.frequency_hours = frequency_hours;
            }
            if let Some(upsell_delay_secs) = widget.upsell_delay_secs {
                self.widget.upsell_delay_secs = upsell_delay_secs;
            }
            if let Some(auto_open) = widget.auto_open {
                self.widget.auto_open = auto_open;
            }
            if let Some(default_locale) = widget.default_locale {
                self.widget.default_locale = default_locale;
            }
            if let Some(request_timeout_ms) = widget.request_timeout_ms {
                self.widget.request_timeout_ms = request_timeout_ms;
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
        if let Some(value) = read_env("RAVENROCK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RAVENROCK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("RAVENROCK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RAVENROCK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("RAVENROCK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RAVENROCK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RAVENROCK_SERVER_PORT") {
            self.server.port = parse_u16("RAVENROCK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("RAVENROCK_SERVER_PROXY_PREFIX") {
            self.server.proxy_prefix = value;
        }
        if let Some(value) = read_env("RAVENROCK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("RAVENROCK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("RAVENROCK_SELECTION_OVERFETCH_FACTOR") {
            self.selection.overfetch_factor =
                parse_usize("RAVENROCK_SELECTION_OVERFETCH_FACTOR", &value)?;
        }
        if let Some(value) = read_env("RAVENROCK_SELECTION_POOL_CEILING") {
            self.selection.pool_ceiling = parse_usize("RAVENROCK_SELECTION_POOL_CEILING", &value)?;
        }

        if let Some(value) = read_env("RAVENROCK_WIDGET_FREQUENCY_HOURS") {
            self.widget.frequency_hours = parse_u32("RAVENROCK_WIDGET_FREQUENCY_HOURS", &value)?;
        }
        if let Some(value) = read_env("RAVENROCK_WIDGET_UPSELL_DELAY_SECS") {
            self.widget.upsell_delay_secs =
                parse_u32("RAVENROCK_WIDGET_UPSELL_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("RAVENROCK_WIDGET_AUTO_OPEN") {
            self.widget.auto_open = parse_bool("RAVENROCK_WIDGET_AUTO_OPEN", &value)?;
        }
        if let Some(value) = read_env("RAVENROCK_WIDGET_DEFAULT_LOCALE") {
            self.widget.default_locale = value;
        }
        if let Some(value) = read_env("RAVENROCK_WIDGET_REQUEST_TIMEOUT_MS") {
            self.widget.request_timeout_ms =
                parse_u64("RAVENROCK_WIDGET_REQUEST_TIMEOUT_MS", &value)?;
        }

        let log_level =
            read_env("RAVENROCK_LOGGING_LEVEL").or_else(|| read_env("RAVENROCK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RAVENROCK_LOGGING_FORMAT").or_else(|| read_env("RAVENROCK_LOG_FORMAT"));
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
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(proxy_prefix) = overrides.proxy_prefix {
            self.server.proxy_prefix = proxy_prefix;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_selection(&self.selection)?;
        validate_widget(&self.widget)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ravenrock.toml"), PathBuf::from("config/ravenrock.toml")]
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

/// Leading slash, no trailing slash.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
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

    if server.proxy_prefix.len() < 2 {
        return Err(ConfigError::Validation(
            "server.proxy_prefix must name a path such as `/apps/ravenrock`".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_selection(selection: &SelectionConfig) -> Result<(), ConfigError> {
    if selection.overfetch_factor == 0 {
        return Err(ConfigError::Validation(
            "selection.overfetch_factor must be greater than zero".to_string(),
        ));
    }

    if selection.pool_ceiling < MAX_RESULT_LIMIT {
        return Err(ConfigError::Validation(format!(
            "selection.pool_ceiling must be at least {MAX_RESULT_LIMIT}"
        )));
    }

    if selection.collection_products == 0 || selection.collection_products > 250 {
        return Err(ConfigError::Validation(
            "selection.collection_products must be in range 1..=250".to_string(),
        ));
    }

    if selection.variants_per_product == 0 || selection.variants_per_product > 250 {
        return Err(ConfigError::Validation(
            "selection.variants_per_product must be in range 1..=250".to_string(),
        ));
    }

    Ok(())
}

fn validate_widget(widget: &WidgetConfig) -> Result<(), ConfigError> {
    if widget.frequency_hours == 0 {
        return Err(ConfigError::Validation(
            "widget.frequency_hours must be greater than zero".to_string(),
        ));
    }

    if widget.request_timeout_ms == 0 || widget.request_timeout_ms > 30_000 {
        return Err(ConfigError::Validation(
            "widget.request_timeout_ms must be in range 1..=30000".to_string(),
        ));
    }

    if widget.default_locale.trim().is_empty() {
        return Err(ConfigError::Validation(
            "widget.default_locale must not be empty".to_string(),
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

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    selection: Option<SelectionPatch>,
    widget: Option<WidgetPatch>,
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
    proxy_prefix: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SelectionPatch {
    overfetch_factor: Option<usize>,
    pool_ceiling: Option<usize>,
    collection_products: Option<usize>,
    variants_per_product: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct WidgetPatch {
    frequency_hours: Option<u32>,
    upsell_delay_secs: Option<u32>,
    auto_open: Option<bool>,
    default_locale: Option<String>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
