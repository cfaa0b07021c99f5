use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use toml::Value;

use crate::commands::{load_config, to_data, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let entry = |key: &'static str, env_key: &str, value: String| ConfigEntry {
        key,
        value,
        source: field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref()),
    };

    let entries = vec![
        entry("database.url", "NOTICEBOARD_DATABASE_URL", config.database.url.clone()),
        entry(
            "database.max_connections",
            "NOTICEBOARD_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            "NOTICEBOARD_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        entry(
            "server.bind_address",
            "NOTICEBOARD_SERVER_BIND_ADDRESS",
            config.server.bind_address.clone(),
        ),
        entry("server.port", "NOTICEBOARD_SERVER_PORT", config.server.port.to_string()),
        entry(
            "approvals.max_approvers",
            "NOTICEBOARD_APPROVALS_MAX_APPROVERS",
            config.approvals.max_approvers.to_string(),
        ),
        entry(
            "approvals.cas_retry_limit",
            "NOTICEBOARD_APPROVALS_CAS_RETRY_LIMIT",
            config.approvals.cas_retry_limit.to_string(),
        ),
        entry(
            "signatures.max_bytes",
            "NOTICEBOARD_SIGNATURES_MAX_BYTES",
            config.signatures.max_bytes.to_string(),
        ),
        entry(
            "dispatch.enabled",
            "NOTICEBOARD_DISPATCH_ENABLED",
            config.dispatch.enabled.to_string(),
        ),
        entry(
            "dispatch.poll_interval_ms",
            "NOTICEBOARD_DISPATCH_POLL_INTERVAL_MS",
            config.dispatch.poll_interval_ms.to_string(),
        ),
        entry(
            "dispatch.gate_webhook_url",
            "NOTICEBOARD_DISPATCH_GATE_WEBHOOK_URL",
            config.dispatch.gate_webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        entry(
            "directory.enforce",
            "NOTICEBOARD_DIRECTORY_ENFORCE",
            config.directory.enforce.to_string(),
        ),
        entry(
            "admin.token",
            "NOTICEBOARD_ADMIN_TOKEN",
            if config.admin.token.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
        ),
        entry("logging.level", "NOTICEBOARD_LOGGING_LEVEL", config.logging.level.clone()),
        entry(
            "logging.format",
            "NOTICEBOARD_LOGGING_FORMAT",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
    ];

    CommandResult::success_with_data(
        "config",
        "effective config (source precedence: env > file > default)",
        to_data(&entries),
    )
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("noticeboard.toml"), PathBuf::from("config/noticeboard.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
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
