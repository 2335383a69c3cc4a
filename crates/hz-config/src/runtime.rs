use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::consumption::{report_unused_keys, UnusedKeyPolicy};
use crate::secrets::{resolve_db_secrets, DbSecrets};
use crate::{load_layers, toml_to_json};

/// Per-project state directory, relative to the project path.
pub const STATE_DIR: &str = ".hz";

/// Config file inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;

/// Longest project name in bytes: `<project>_internal` must still fit a
/// 63-byte database identifier.
pub const MAX_PROJECT_NAME_BYTES: usize = 63 - "_internal".len();

/// Values from command-line flags. `None` leaves lower layers in effect.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub project_name: Option<String>,
    pub connect: Option<String>,
    pub debug: Option<bool>,
}

/// Where to look for configuration.
#[derive(Debug, Clone)]
pub struct ConfigRequest<'a> {
    pub project_dir: &'a Path,
    /// Explicit config file; must exist. Otherwise `<project>/.hz/config.toml`
    /// is used when present.
    pub config_file: Option<&'a Path>,
    pub overrides: Overrides,
    pub unused_keys: UnusedKeyPolicy,
}

#[derive(Deserialize)]
struct Settings {
    project_name: Option<String>,
    connect: Option<String>,
    debug: bool,
    ready_timeout_secs: u64,
    db: DbSettings,
}

#[derive(Deserialize)]
struct DbSettings {
    user: String,
    name: String,
}

/// Effective configuration for one run.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub project_dir: PathBuf,
    pub project_name: String,
    /// `host:port` of the database server.
    pub connect: Option<String>,
    pub db_user: String,
    pub db_name: String,
    pub debug: bool,
    pub ready_timeout: Duration,
    pub secrets: DbSecrets,
    /// The config file that was loaded, if any.
    pub config_file: Option<PathBuf>,
    /// SHA-256 of the canonical merged configuration.
    pub config_hash: String,
    /// Config-file keys nothing reads.
    pub unused_keys: Vec<String>,
}

fn defaults() -> Value {
    json!({
        "debug": false,
        "ready_timeout_secs": DEFAULT_READY_TIMEOUT_SECS,
        "db": { "user": "postgres", "name": "postgres" },
    })
}

/// Merge defaults, config file, environment (through `lookup`) and `req`'s
/// overrides into a [`RuntimeConfig`].
pub fn resolve_runtime_config(
    req: &ConfigRequest<'_>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeConfig> {
    let (config_file, file_layer) = read_file_layer(req)?;
    let unused = report_unused_keys(&file_layer, req.unused_keys).with_context(|| {
        format!(
            "config file {}",
            config_file
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        )
    })?;

    let loaded = load_layers(vec![
        defaults(),
        file_layer,
        env_layer(&lookup)?,
        overrides_layer(&req.overrides),
    ])?;
    let settings: Settings =
        serde_json::from_value(loaded.config_json).context("invalid configuration")?;

    let project_name = match settings.project_name {
        Some(name) if !name.trim().is_empty() => name,
        _ => default_project_name(req.project_dir)?,
    };
    if project_name.len() > MAX_PROJECT_NAME_BYTES {
        bail!(
            "project name {project_name:?} is {} bytes; the limit is {MAX_PROJECT_NAME_BYTES}",
            project_name.len()
        );
    }
    if settings.ready_timeout_secs == 0 {
        bail!("ready_timeout_secs must be positive");
    }

    Ok(RuntimeConfig {
        project_dir: req.project_dir.to_path_buf(),
        project_name,
        connect: settings.connect.filter(|c| !c.trim().is_empty()),
        db_user: settings.db.user,
        db_name: settings.db.name,
        debug: settings.debug,
        ready_timeout: Duration::from_secs(settings.ready_timeout_secs),
        secrets: resolve_db_secrets(&lookup),
        config_file,
        config_hash: loaded.config_hash,
        unused_keys: unused.unused_leaf_pointers,
    })
}

fn read_file_layer(req: &ConfigRequest<'_>) -> Result<(Option<PathBuf>, Value)> {
    let path = match req.config_file {
        Some(explicit) => explicit.to_path_buf(),
        None => {
            let implicit = req.project_dir.join(STATE_DIR).join(CONFIG_FILE);
            if !implicit.is_file() {
                return Ok((None, json!({})));
            }
            implicit
        }
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let layer = toml_to_json(&raw).with_context(|| format!("config file {}", path.display()))?;
    Ok((Some(path), layer))
}

/// `HZ_*` environment variables as a config layer.
pub fn env_layer(lookup: impl Fn(&str) -> Option<String>) -> Result<Value> {
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let mut layer = Map::new();
    let mut db = Map::new();

    if let Some(v) = read("HZ_PROJECT_NAME") {
        layer.insert("project_name".into(), Value::String(v));
    }
    if let Some(v) = read("HZ_CONNECT") {
        layer.insert("connect".into(), Value::String(v));
    }
    if let Some(v) = read("HZ_DEBUG") {
        let flag = parse_yes_no(&v).context("HZ_DEBUG")?;
        layer.insert("debug".into(), Value::Bool(flag));
    }
    if let Some(v) = read("HZ_READY_TIMEOUT_SECS") {
        let secs: u64 = v
            .trim()
            .parse()
            .with_context(|| format!("HZ_READY_TIMEOUT_SECS: expected whole seconds, got {v:?}"))?;
        layer.insert("ready_timeout_secs".into(), json!(secs));
    }
    if let Some(v) = read("HZ_DB_USER") {
        db.insert("user".into(), Value::String(v));
    }
    if let Some(v) = read("HZ_DB_NAME") {
        db.insert("name".into(), Value::String(v));
    }
    if !db.is_empty() {
        layer.insert("db".into(), Value::Object(db));
    }
    Ok(Value::Object(layer))
}

fn overrides_layer(o: &Overrides) -> Value {
    json!({
        "project_name": o.project_name,
        "connect": o.connect,
        "debug": o.debug,
    })
}

/// `yes`/`no` flag values; `true`/`false` and `1`/`0` are accepted too.
pub fn parse_yes_no(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        other => bail!("expected yes or no, got {other:?}"),
    }
}

/// Basename of the project directory, resolving `.` and relative paths.
pub fn default_project_name(project_dir: &Path) -> Result<String> {
    let resolved = std::fs::canonicalize(project_dir)
        .with_context(|| format!("project path {} not found", project_dir.display()))?;
    match resolved.file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => bail!(
            "cannot derive a project name from {}; pass --project-name",
            resolved.display()
        ),
    }
}
