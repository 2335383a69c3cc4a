use anyhow::{Context, Result};
use clap::Args;
use hz_config::{RuntimeConfig, STATE_DIR};
use hz_reconcile::SaveOptions;
use std::path::PathBuf;
use tracing::info;

use super::{connect, interrupt_on_ctrl_c, prepare, CommonArgs};

/// File name of the default output under the project's state directory.
const DEFAULT_OUT_FILE: &str = "schema.toml";

#[derive(Args, Debug)]
pub struct SaveArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Output path, or `-` for stdout (default: <project>/.hz/schema.toml)
    #[arg(long, value_name = "PATH")]
    pub out_file: Option<String>,
}

enum Output {
    Stdout,
    File(PathBuf),
}

pub async fn run(args: SaveArgs) -> Result<()> {
    let cfg = prepare(&args.common)?;
    let output = output_for(args.out_file.as_deref(), &cfg);

    let conn = connect(&cfg).await?;
    let opts = SaveOptions::new(&cfg.project_name).with_ready_timeout(cfg.ready_timeout);
    let schema = hz_reconcile::save(&conn, &opts, &interrupt_on_ctrl_c())
        .await
        .with_context(|| format!("save of project {} failed", cfg.project_name))?;

    // The connection is closed by now; only local output remains.
    let text = hz_schema::render(&schema);
    match output {
        Output::Stdout => print!("{text}"),
        Output::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, &text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "schema saved");
            println!("project={}", cfg.project_name);
            println!("out_file={}", path.display());
            println!("collections={}", schema.collections.len());
            println!("groups={}", schema.groups.len());
        }
    }
    Ok(())
}

fn output_for(out_file: Option<&str>, cfg: &RuntimeConfig) -> Output {
    match out_file {
        Some("-") => Output::Stdout,
        Some(path) => Output::File(PathBuf::from(path)),
        None => Output::File(cfg.project_dir.join(STATE_DIR).join(DEFAULT_OUT_FILE)),
    }
}
