use anyhow::{Context, Result};
use clap::Args;
use hz_reconcile::{ApplyOptions, ApplyReport, Mode};
use std::io::Read;
use tracing::info;

use super::{connect, interrupt_on_ctrl_c, prepare, print_list, CommonArgs, YesNo};

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Schema document, or `-` to read it from stdin
    #[arg(value_name = "SCHEMA_FILE")]
    pub schema_file: String,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Only add and update; never remove anything
    #[arg(
        long,
        value_enum,
        num_args = 0..=1,
        default_value_t = YesNo::No,
        default_missing_value = "yes"
    )]
    pub update: YesNo,

    /// Allow removing collections (and their data) missing from the schema
    #[arg(
        long,
        value_enum,
        num_args = 0..=1,
        default_value_t = YesNo::No,
        default_missing_value = "yes"
    )]
    pub force: YesNo,
}

pub async fn run(args: ApplyArgs) -> Result<()> {
    let cfg = prepare(&args.common)?;

    // The document must validate before the database is contacted.
    let text = read_source(&args.schema_file)?;
    let schema = hz_schema::parse(&text)
        .with_context(|| format!("invalid schema document {}", args.schema_file))?;

    let mode = if bool::from(args.update) {
        Mode::Update
    } else {
        Mode::Replace
    };
    let opts = ApplyOptions::new(&cfg.project_name)
        .with_mode(mode)
        .with_force(args.force.into())
        .with_ready_timeout(cfg.ready_timeout);

    let conn = connect(&cfg).await?;
    let interrupt = interrupt_on_ctrl_c();
    let report = hz_reconcile::apply(&conn, &schema, &opts, &interrupt)
        .await
        .with_context(|| format!("apply to project {} failed", cfg.project_name))?;

    info!(project = %cfg.project_name, noop = report.is_noop(), "schema applied");
    print_report(&cfg.project_name, mode, &report);
    Ok(())
}

fn read_source(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read schema from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read schema file: {path}"))
}

fn print_report(project: &str, mode: Mode, r: &ApplyReport) {
    let mode = match mode {
        Mode::Update => "update",
        Mode::Replace => "replace",
    };
    println!("project={project}");
    println!("mode={mode}");
    println!("metadata_created={}", r.metadata_created);
    print_list("groups_inserted", &r.groups_inserted);
    print_list("groups_updated", &r.groups_updated);
    print_list("groups_deleted", &r.groups_deleted);
    print_list("tables_created", &r.tables_created);
    print_list("collections_removed", &r.collections_removed);
    print_list("indexes_created", &r.indexes_created);
    print_list("indexes_dropped", &r.indexes_dropped);
    println!("noop={}", r.is_noop());
}
