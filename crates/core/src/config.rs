use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::signature::DEFAULT_MAX_SIGNATURE_BYTES;

const ENV_PREFIX: &str = "NOTICEBOARD_";
const MAX_SIGNATURE_CEILING: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub approvals: ApprovalsConfig,
    pub signatures: SignaturesConfig,
    pub dispatch: DispatchConfig,
    pub directory: DirectoryConfig,
    pub admin: AdminConfig,
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
pub struct ApprovalsConfig {
    pub max_approvers: usize,
    /// Reload-and-reevaluate attempts after a stale compare-and-swap.
    pub cas_retry_limit: u32,
}

#[derive(Clone, Debug)]
pub struct SignaturesConfig {
    pub max_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub batch_size: u32,
    /// When unset, gate signals wait in the outbox for the notice store to
    /// poll and acknowledge them.
    pub gate_webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    /// Check notices and approvers against the synced registry tables.
    pub enforce: bool,
}

#[derive(Clone, Debug, Default)]
pub struct AdminConfig {
    pub token: Option<SecretString>,
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
    pub port: Option<u16>,
    pub dispatch_enabled: Option<bool>,
    pub directory_enforce: Option<bool>,
    pub admin_token: Option<String>,
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
                url: "sqlite://noticeboard.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            approvals: ApprovalsConfig { max_approvers: 20, cas_retry_limit: 3 },
            signatures: SignaturesConfig { max_bytes: DEFAULT_MAX_SIGNATURE_BYTES },
            dispatch: DispatchConfig {
                enabled: true,
                poll_interval_ms: 1_000,
                batch_size: 50,
                gate_webhook_url: None,
                webhook_timeout_secs: 10,
            },
            directory: DirectoryConfig { enforce: false },
            admin: AdminConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl AdminConfig {
    /// Compares SHA-256 digests of both tokens in constant time, so neither the
    /// matching prefix nor the configured token length shows in timing.
    pub fn accepts(&self, presented: Option<&str>) -> bool {
        let (Some(expected), Some(presented)) = (self.token.as_ref(), presented) else {
            return false;
        };
        let expected = Sha256::digest(expected.expose_secret().as_bytes());
        let presented = Sha256::digest(presented.as_bytes());
        bool::from(expected.as_slice().ct_eq(presented.as_slice()))
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("noticeboard.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
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
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(approvals) = patch.approvals {
            if let Some(max_approvers) = approvals.max_approvers {
                self.approvals.max_approvers = max_approvers;
            }
            if let Some(cas_retry_limit) = approvals.cas_retry_limit {
                self.approvals.cas_retry_limit = cas_retry_limit;
            }
        }

        if let Some(signatures) = patch.signatures {
            if let Some(max_bytes) = signatures.max_bytes {
                self.signatures.max_bytes = max_bytes;
            }
        }

        if let Some(dispatch) = patch.dispatch {
            if let Some(enabled) = dispatch.enabled {
                self.dispatch.enabled = enabled;
            }
            if let Some(poll_interval_ms) = dispatch.poll_interval_ms {
                self.dispatch.poll_interval_ms = poll_interval_ms;
            }
            if let Some(batch_size) = dispatch.batch_size {
                self.dispatch.batch_size = batch_size;
            }
            if let Some(gate_webhook_url) = dispatch.gate_webhook_url {
                self.dispatch.gate_webhook_url = Some(gate_webhook_url);
            }
            if let Some(webhook_timeout_secs) = dispatch.webhook_timeout_secs {
                self.dispatch.webhook_timeout_secs = webhook_timeout_secs;
            }
        }

        if let Some(directory) = patch.directory {
            if let Some(enforce) = directory.enforce {
                self.directory.enforce = enforce;
            }
        }

        if let Some(admin) = patch.admin {
            if let Some(admin_token_value) = admin.token {
                self.admin.token = Some(secret_value(admin_token_value));
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
        if let Some(value) = read_env("DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SERVER_PORT") {
            self.server.port = parse_env("SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("APPROVALS_MAX_APPROVERS") {
            self.approvals.max_approvers = parse_env("APPROVALS_MAX_APPROVERS", &value)?;
        }
        if let Some(value) = read_env("APPROVALS_CAS_RETRY_LIMIT") {
            self.approvals.cas_retry_limit = parse_env("APPROVALS_CAS_RETRY_LIMIT", &value)?;
        }

        if let Some(value) = read_env("SIGNATURES_MAX_BYTES") {
            self.signatures.max_bytes = parse_env("SIGNATURES_MAX_BYTES", &value)?;
        }

        if let Some(value) = read_env("DISPATCH_ENABLED") {
            self.dispatch.enabled = parse_env("DISPATCH_ENABLED", &value)?;
        }
        if let Some(value) = read_env("DISPATCH_POLL_INTERVAL_MS") {
            self.dispatch.poll_interval_ms = parse_env("DISPATCH_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("DISPATCH_BATCH_SIZE") {
            self.dispatch.batch_size = parse_env("DISPATCH_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("DISPATCH_GATE_WEBHOOK_URL") {
            self.dispatch.gate_webhook_url = Some(value);
        }
        if let Some(value) = read_env("DISPATCH_WEBHOOK_TIMEOUT_SECS") {
            self.dispatch.webhook_timeout_secs =
                parse_env("DISPATCH_WEBHOOK_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DIRECTORY_ENFORCE") {
            self.directory.enforce = parse_env("DIRECTORY_ENFORCE", &value)?;
        }

        if let Some(value) = read_env("ADMIN_TOKEN") {
            self.admin.token = Some(secret_value(value));
        }

        let log_level = read_env("LOGGING_LEVEL").or_else(|| read_env("LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("LOGGING_FORMAT").or_else(|| read_env("LOG_FORMAT"));
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
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.dispatch_enabled {
            self.dispatch.enabled = enabled;
        }
        if let Some(enforce) = overrides.directory_enforce {
            self.directory.enforce = enforce;
        }
        if let Some(admin_token) = overrides.admin_token {
            self.admin.token = Some(secret_value(admin_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_approvals(&self.approvals)?;
        validate_signatures(&self.signatures)?;
        validate_dispatch(&self.dispatch)?;
        validate_admin(&self.admin)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("noticeboard.toml"), PathBuf::from("config/noticeboard.toml")]
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
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

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

fn validate_approvals(approvals: &ApprovalsConfig) -> Result<(), ConfigError> {
    if approvals.max_approvers == 0 || approvals.max_approvers > 100 {
        return Err(ConfigError::Validation(
            "approvals.max_approvers must be in range 1..=100".to_string(),
        ));
    }

    if approvals.cas_retry_limit == 0 || approvals.cas_retry_limit > 20 {
        return Err(ConfigError::Validation(
            "approvals.cas_retry_limit must be in range 1..=20".to_string(),
        ));
    }

    Ok(())
}

fn validate_signatures(signatures: &SignaturesConfig) -> Result<(), ConfigError> {
    if signatures.max_bytes == 0 || signatures.max_bytes > MAX_SIGNATURE_CEILING {
        return Err(ConfigError::Validation(format!(
            "signatures.max_bytes must be in range 1..={MAX_SIGNATURE_CEILING}"
        )));
    }

    Ok(())
}

fn validate_dispatch(dispatch: &DispatchConfig) -> Result<(), ConfigError> {
    if dispatch.poll_interval_ms < 50 {
        return Err(ConfigError::Validation(
            "dispatch.poll_interval_ms must be at least 50".to_string(),
        ));
    }

    if dispatch.batch_size == 0 || dispatch.batch_size > 1_000 {
        return Err(ConfigError::Validation(
            "dispatch.batch_size must be in range 1..=1000".to_string(),
        ));
    }

    if dispatch.webhook_timeout_secs == 0 || dispatch.webhook_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "dispatch.webhook_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if let Some(url) = &dispatch.gate_webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "dispatch.gate_webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_admin(admin: &AdminConfig) -> Result<(), ConfigError> {
    if let Some(token) = &admin.token {
        if token.expose_secret().trim().len() < 16 {
            return Err(ConfigError::Validation(
                "admin.token must be at least 16 characters; unset it to disable admin withdraw"
                    .to_string(),
            ));
        }
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

fn read_env(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}")).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(suffix: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: format!("{ENV_PREFIX}{suffix}"),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    approvals: Option<ApprovalsPatch>,
    signatures: Option<SignaturesPatch>,
    dispatch: Option<DispatchPatch>,
    directory: Option<DirectoryPatch>,
    admin: Option<AdminPatch>,
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
struct ApprovalsPatch {
    max_approvers: Option<usize>,
    cas_retry_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SignaturesPatch {
    max_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchPatch {
    enabled: Option<bool>,
    poll_interval_ms: Option<u64>,
    batch_size: Option<u32>,
    gate_webhook_url: Option<String>,
    webhook_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryPatch {
    enforce: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AdminPatch {
    token: Option<String>,
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

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

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
    fn defaults_are_valid_without_any_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.approvals.max_approvers == 20, "default chain limit should be 20")?;
        ensure(config.signatures.max_bytes == 512 * 1024, "default signature ceiling is 512 KiB")?;
        ensure(config.dispatch.gate_webhook_url.is_none(), "gate webhook is off by default")?;
        ensure(config.admin.token.is_none(), "admin withdraw is disabled by default")?;
        ensure(!config.directory.enforce, "directory checks are opt-in")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_NOTICEBOARD_ADMIN_TOKEN", "admin-token-from-env-0001");
        env::set_var("TEST_NOTICEBOARD_GATE_URL", "https://notices.internal/gate");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("noticeboard.toml");
            fs::write(
                &path,
                r#"
[admin]
token = "${TEST_NOTICEBOARD_ADMIN_TOKEN}"

[dispatch]
gate_webhook_url = "${TEST_NOTICEBOARD_GATE_URL}"
batch_size = 10
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.admin.token.as_ref().map(|token| token.expose_secret().to_owned())
                    == Some("admin-token-from-env-0001".to_owned()),
                "admin token should be interpolated from environment",
            )?;
            ensure(
                config.dispatch.gate_webhook_url.as_deref()
                    == Some("https://notices.internal/gate"),
                "gate webhook url should be interpolated from environment",
            )?;
            ensure(config.dispatch.batch_size == 10, "batch size should come from the file")?;
            Ok(())
        })();

        clear_vars(&["TEST_NOTICEBOARD_ADMIN_TOKEN", "TEST_NOTICEBOARD_GATE_URL"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("noticeboard.toml");
        fs::write(&path, "[admin]\ntoken = \"${NOTICEBOARD_TEST_UNSET_VARIABLE}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected interpolation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(
                error,
                ConfigError::MissingEnvInterpolation { ref var }
                    if var == "NOTICEBOARD_TEST_UNSET_VARIABLE"
            ),
            "missing variable should be named in the error",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOTICEBOARD_LOG_LEVEL", "warn");
        env::set_var("NOTICEBOARD_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["NOTICEBOARD_LOG_LEVEL", "NOTICEBOARD_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOTICEBOARD_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("NOTICEBOARD_APPROVALS_MAX_APPROVERS", "7");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("noticeboard.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[approvals]
max_approvers = 5
cas_retry_limit = 4

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
            ensure(config.approvals.max_approvers == 7, "env should win over file")?;
            ensure(config.approvals.cas_retry_limit == 4, "file should win over defaults")?;
            Ok(())
        })();

        clear_vars(&["NOTICEBOARD_DATABASE_URL", "NOTICEBOARD_APPROVALS_MAX_APPROVERS"]);
        result
    }

    #[test]
    fn invalid_env_override_names_the_variable() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOTICEBOARD_DISPATCH_BATCH_SIZE", "lots");
        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected env override failure".to_string()),
            Err(error) => ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "NOTICEBOARD_DISPATCH_BATCH_SIZE"
                ),
                "error should name the offending variable",
            ),
        };

        clear_vars(&["NOTICEBOARD_DISPATCH_BATCH_SIZE"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOTICEBOARD_DISPATCH_GATE_WEBHOOK_URL", "notices.internal/gate");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("dispatch.gate_webhook_url")
            );
            ensure(has_message, "validation failure should mention dispatch.gate_webhook_url")
        })();

        clear_vars(&["NOTICEBOARD_DISPATCH_GATE_WEBHOOK_URL"]);
        result
    }

    #[test]
    fn short_admin_token_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                admin_token: Some("short".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("admin.token")),
            "validation failure should mention admin.token",
        )
    }

    #[test]
    fn admin_token_comparison_requires_exact_match() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                admin_token: Some("correct-horse-battery".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.admin.accepts(Some("correct-horse-battery")), "exact token is accepted")?;
        ensure(!config.admin.accepts(Some("correct-horse-batterx")), "near miss is refused")?;
        ensure(!config.admin.accepts(Some("correct")), "prefix is refused")?;
        ensure(
            !config.admin.accepts(Some("correct-horse-battery-staple")),
            "longer token is refused",
        )?;
        ensure(!config.admin.accepts(Some("")), "empty header is refused")?;
        ensure(!config.admin.accepts(None), "missing header is refused")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOTICEBOARD_ADMIN_TOKEN", "admin-secret-value-123");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("admin-secret-value-123"),
                "debug output should not contain the admin token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["NOTICEBOARD_ADMIN_TOKEN"]);
        result
    }
}
