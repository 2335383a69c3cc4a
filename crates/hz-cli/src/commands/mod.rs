//! Command handler modules for the `hz` CLI.
//!
//! Shared utilities used by both commands live here: flag definitions,
//! configuration loading, tracing setup, connecting and interrupt wiring.

pub mod apply;
pub mod save;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use hz_config::{
    resolve_runtime_config, ConfigRequest, Overrides, RuntimeConfig, UnusedKeyPolicy,
};
use hz_db::{DbTarget, PgConnection, DEFAULT_HOST, DEFAULT_PORT};
use hz_reconcile::{interrupt_channel, Interrupt};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum YesNo {
    Yes,
    No,
}

impl From<YesNo> for bool {
    fn from(v: YesNo) -> bool {
        v == YesNo::Yes
    }
}

/// Flags shared by `apply` and `save`.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Project directory
    #[arg(default_value = ".")]
    pub project_path: PathBuf,

    /// Project name (default: project directory name)
    #[arg(long)]
    pub project_name: Option<String>,

    /// Database server address
    #[arg(long, value_name = "HOST:PORT")]
    pub connect: Option<String>,

    /// Start a database server for this run
    #[arg(
        long,
        value_enum,
        num_args = 0..=1,
        default_value_t = YesNo::No,
        default_missing_value = "yes"
    )]
    pub start_rethinkdb: YesNo,

    /// Config file (default: <project>/.hz/config.toml when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, value_enum, num_args = 0..=1, default_missing_value = "yes")]
    pub debug: Option<YesNo>,
}

/// Resolve configuration and initialise logging. Fails before any database
/// contact.
pub fn prepare(common: &CommonArgs) -> Result<RuntimeConfig> {
    if bool::from(common.start_rethinkdb) {
        bail!(
            "--start-rethinkdb yes is not supported: the backing store is PostgreSQL; \
             start it separately and pass --connect HOST:PORT"
        );
    }

    let req = ConfigRequest {
        project_dir: &common.project_path,
        config_file: common.config.as_deref(),
        overrides: Overrides {
            project_name: common.project_name.clone(),
            connect: common.connect.clone(),
            debug: common.debug.map(bool::from),
        },
        unused_keys: UnusedKeyPolicy::Warn,
    };
    let cfg = resolve_runtime_config(&req, |name| std::env::var(name).ok())?;

    init_tracing(cfg.debug);
    debug!(config_hash = %cfg.config_hash, config = ?cfg, "configuration loaded");
    if !cfg.unused_keys.is_empty() {
        warn!(keys = ?cfg.unused_keys, "unused config keys");
    }
    Ok(cfg)
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

pub fn db_target(cfg: &RuntimeConfig) -> Result<DbTarget> {
    let (host, port) = match cfg.connect.as_deref() {
        Some(addr) => DbTarget::parse_address(addr)?,
        None => (DEFAULT_HOST.to_string(), DEFAULT_PORT),
    };
    Ok(DbTarget {
        host,
        port,
        user: cfg.db_user.clone(),
        password: cfg.secrets.password.clone(),
        database: cfg.db_name.clone(),
        url: cfg.secrets.database_url.clone(),
    })
}

pub async fn connect(cfg: &RuntimeConfig) -> Result<PgConnection> {
    let target = db_target(cfg)?;
    debug!(?target, "connecting");
    hz_db::connect(&target)
        .await
        .with_context(|| format!("cannot reach database at {}", target.display_address()))
}

/// An interrupt raised by Ctrl-C.
pub fn interrupt_on_ctrl_c() -> Interrupt {
    let (handle, interrupt) = interrupt_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            handle.raise();
        }
    });
    interrupt
}

/// `key=a,b,c` line; empty lists print as `key=`.
pub fn print_list<T: ToString>(key: &str, items: &[T]) {
    let joined = items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    println!("{key}={joined}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use hz_config::secrets::DbSecrets;
    use std::time::Duration;

    fn cfg(connect: Option<&str>) -> RuntimeConfig {
        RuntimeConfig {
            project_dir: PathBuf::from("."),
            project_name: "blog".to_string(),
            connect: connect.map(str::to_string),
            db_user: "app".to_string(),
            db_name: "appdb".to_string(),
            debug: false,
            ready_timeout: Duration::from_secs(30),
            secrets: DbSecrets {
                password: Some("pw".to_string()),
                database_url: None,
            },
            config_file: None,
            config_hash: String::new(),
            unused_keys: Vec::new(),
        }
    }

    #[test]
    fn target_defaults_to_local_server() {
        let t = db_target(&cfg(None)).unwrap();
        assert_eq!((t.host.as_str(), t.port), (DEFAULT_HOST, DEFAULT_PORT));
        assert_eq!(t.user, "app");
        assert_eq!(t.database, "appdb");
        assert_eq!(t.password.as_deref(), Some("pw"));
    }

    #[test]
    fn target_uses_connect_address() {
        let t = db_target(&cfg(Some("db.internal:6543"))).unwrap();
        assert_eq!((t.host.as_str(), t.port), ("db.internal", 6543));
        assert!(db_target(&cfg(Some(":x"))).is_err());
    }
}
