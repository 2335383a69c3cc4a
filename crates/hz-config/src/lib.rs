//! hz-config
//!
//! Layered configuration for the `hz` tool.
//!
//! Layers merge in order, later wins:
//!   built-in defaults -> config file (TOML) -> `HZ_*` environment -> CLI flags
//!
//! Every layer is converted to JSON and deep-merged. The merged document is
//! canonicalized and hashed (SHA-256) so a run can log exactly what it used.
//! Secrets never live in config files: a password literal is rejected with
//! `CONFIG_SECRET_DETECTED` and the database password is read from the
//! environment only (see [`secrets`]).

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

mod consumption;
mod runtime;
pub mod secrets;

pub use consumption::{consumed_pointers, report_unused_keys, UnusedKeyPolicy, UnusedKeyReport};
pub use runtime::{
    default_project_name, env_layer, parse_yes_no, resolve_runtime_config, ConfigRequest,
    Overrides, RuntimeConfig, CONFIG_FILE, DEFAULT_READY_TIMEOUT_SECS, MAX_PROJECT_NAME_BYTES,
    STATE_DIR,
};

/// Known secret-like prefixes. A leaf string starting with one of these
/// aborts loading with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

/// Keys whose mere presence in a config file is a secret literal.
const SECRET_KEYS: &[&str] = &["password", "passwd", "secret"];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_toml(paths: &[&Path]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw = fs::read_to_string(p)
            .with_context(|| format!("failed to read config file: {}", p.display()))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_toml_from_strings(&doc_refs)
}

pub fn load_layered_toml_from_strings(toml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut layers = Vec::with_capacity(toml_docs.len());
    for raw in toml_docs {
        layers.push(toml_to_json(raw)?);
    }
    load_layers(layers)
}

/// Merge already-converted JSON layers in order: earlier layers are base,
/// later layers override.
pub fn load_layers(layers: Vec<Value>) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for layer in layers {
        merged = deep_merge(merged, layer);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

pub(crate) fn toml_to_json(raw: &str) -> Result<Value> {
    let v_toml: toml::Table = raw.parse().context("invalid toml")?;
    serde_json::to_value(v_toml).context("toml->json conversion failed")
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        // A null override means "not set" and keeps the base value.
        (a, Value::Null) => a,
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json's default Map is ordered by key, so compact output is canonical.
    let s = serde_json::to_string(v).context("canonical json serialize failed")?;
    Ok(s)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    hex::encode(out)
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    consumption::collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        let key = ptr.rsplit('/').next().unwrap_or_default().to_ascii_lowercase();
        if SECRET_KEYS.contains(&key.as_str()) {
            bail!(
                "CONFIG_SECRET_DETECTED leaf={} value=REDACTED; set {} instead",
                ptr,
                secrets::ENV_DB_PASSWORD
            );
        }
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if secrets::url_has_password(t) {
        return true;
    }
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_layers_override_nested_keys() {
        let merged = deep_merge(
            json!({"db": {"user": "postgres", "name": "postgres"}, "debug": false}),
            json!({"db": {"name": "blog"}, "debug": true}),
        );
        assert_eq!(
            merged,
            json!({"db": {"user": "postgres", "name": "blog"}, "debug": true})
        );
    }

    #[test]
    fn null_layer_value_keeps_base() {
        let merged = deep_merge(json!({"connect": "db:5432"}), json!({"connect": null}));
        assert_eq!(merged, json!({"connect": "db:5432"}));
    }

    #[test]
    fn password_key_is_rejected_anywhere() {
        let err = load_layered_toml_from_strings(&["[db]\npassword = \"hunter2\"\n"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("CONFIG_SECRET_DETECTED"), "{msg}");
        assert!(msg.contains("/db/password"), "{msg}");
        assert!(!msg.contains("hunter2"), "secret value leaked: {msg}");
    }

    #[test]
    fn url_with_credentials_is_rejected() {
        let doc = "connect = \"postgres://app:pw@db:5432/app\"\n";
        let err = load_layered_toml_from_strings(&[doc]).unwrap_err();
        assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(load_layered_toml_from_strings(&["debug = ="]).is_err());
    }
}
