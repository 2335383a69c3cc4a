//! Layer precedence, project-name defaulting and hashing.
//!
//! GREEN when:
//! - defaults < config file < environment < flags, key by key.
//! - the project name falls back to the project directory's basename.
//! - an explicit --config path must exist; the implicit one is optional.
//! - the config hash is stable for equal inputs and changes with them.
//! - a project name too long for its internal namespace is refused.

use hz_config::{
    load_layered_toml_from_strings, resolve_runtime_config, ConfigRequest, Overrides,
    UnusedKeyPolicy, CONFIG_FILE, MAX_PROJECT_NAME_BYTES, STATE_DIR,
};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn no_env(_: &str) -> Option<String> {
    None
}

fn request(dir: &Path) -> ConfigRequest<'_> {
    ConfigRequest {
        project_dir: dir,
        config_file: None,
        overrides: Overrides::default(),
        unused_keys: UnusedKeyPolicy::Warn,
    }
}

fn write_project_config(dir: &Path, body: &str) {
    let state = dir.join(STATE_DIR);
    fs::create_dir_all(&state).unwrap();
    fs::write(state.join(CONFIG_FILE), body).unwrap();
}

#[test]
fn defaults_apply_without_any_layer() {
    let root = tempdir().unwrap();
    let project = root.path().join("blog");
    fs::create_dir(&project).unwrap();

    let cfg = resolve_runtime_config(&request(&project), no_env).unwrap();
    assert_eq!(cfg.project_name, "blog");
    assert_eq!(cfg.connect, None);
    assert_eq!(cfg.db_user, "postgres");
    assert_eq!(cfg.db_name, "postgres");
    assert!(!cfg.debug);
    assert_eq!(cfg.ready_timeout, Duration::from_secs(30));
    assert!(cfg.config_file.is_none());
    assert!(cfg.unused_keys.is_empty());
}

#[test]
fn each_layer_overrides_the_previous() {
    let root = tempdir().unwrap();
    write_project_config(
        root.path(),
        r#"
project_name = "from_file"
connect = "file-host:5432"
ready_timeout_secs = 5

[db]
user = "file_user"
name = "file_db"
"#,
    );

    let env = |name: &str| match name {
        "HZ_CONNECT" => Some("env-host:6543".to_string()),
        "HZ_DB_USER" => Some("env_user".to_string()),
        _ => None,
    };
    let mut req = request(root.path());
    req.overrides = Overrides {
        connect: Some("flag-host:7777".to_string()),
        debug: Some(true),
        ..Overrides::default()
    };

    let cfg = resolve_runtime_config(&req, env).unwrap();
    assert_eq!(cfg.project_name, "from_file");
    assert_eq!(cfg.connect.as_deref(), Some("flag-host:7777"));
    assert_eq!(cfg.db_user, "env_user");
    assert_eq!(cfg.db_name, "file_db");
    assert_eq!(cfg.ready_timeout, Duration::from_secs(5));
    assert!(cfg.debug);
    assert!(cfg.config_file.is_some());
}

#[test]
fn explicit_config_file_must_exist() {
    let root = tempdir().unwrap();
    let missing = root.path().join("nope.toml");
    let mut req = request(root.path());
    req.config_file = Some(&missing);

    let err = resolve_runtime_config(&req, no_env).unwrap_err();
    assert!(format!("{err:#}").contains("nope.toml"));
}

#[test]
fn password_comes_from_environment_only() {
    let root = tempdir().unwrap();
    let env = |name: &str| (name == "HZ_DB_PASSWORD").then(|| "hunter2".to_string());

    let cfg = resolve_runtime_config(&request(root.path()), env).unwrap();
    assert_eq!(cfg.secrets.password.as_deref(), Some("hunter2"));
    assert!(!format!("{cfg:?}").contains("hunter2"));

    write_project_config(root.path(), "[db]\npassword = \"hunter2\"\n");
    let err = resolve_runtime_config(&request(root.path()), no_env).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("CONFIG_SECRET_DETECTED"), "{msg}");
    assert!(!msg.contains("hunter2"), "{msg}");
}

#[test]
fn hash_tracks_effective_values() {
    let root = tempdir().unwrap();
    let a = resolve_runtime_config(&request(root.path()), no_env).unwrap();
    let b = resolve_runtime_config(&request(root.path()), no_env).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.config_hash.len(), 64);

    let mut req = request(root.path());
    req.overrides.debug = Some(true);
    let c = resolve_runtime_config(&req, no_env).unwrap();
    assert_ne!(a.config_hash, c.config_hash);
}

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_toml_from_strings(&["connect = \"h:1\"\ndebug = true\n"]).unwrap();
    let b = load_layered_toml_from_strings(&["debug = true\nconnect = \"h:1\"\n"]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn project_name_must_leave_room_for_internal_namespace() {
    let root = tempdir().unwrap();
    let mut req = request(root.path());

    req.overrides.project_name = Some("p".repeat(MAX_PROJECT_NAME_BYTES));
    let cfg = resolve_runtime_config(&req, no_env).unwrap();
    assert_eq!(format!("{}_internal", cfg.project_name).len(), 63);

    req.overrides.project_name = Some("p".repeat(MAX_PROJECT_NAME_BYTES + 1));
    let err = resolve_runtime_config(&req, no_env).unwrap_err();
    assert!(format!("{err:#}").contains("the limit is 54"), "{err:#}");
}
