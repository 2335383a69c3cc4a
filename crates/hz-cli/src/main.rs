use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::apply::ApplyArgs;
use commands::save::SaveArgs;

#[derive(Parser)]
#[command(name = "hz")]
#[command(about = "Reconcile a project's database schema with a TOML document", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make the database match a schema document
    Apply(ApplyArgs),

    /// Write the live database schema as a schema document
    Save(SaveArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent when missing.
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Apply(args) => commands::apply::run(args).await,
        Commands::Save(args) => commands::save::run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::YesNo;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("hz").chain(args.iter().copied()))
            .unwrap()
            .cmd
    }

    #[test]
    fn bare_yes_no_flags_mean_yes() {
        let Commands::Apply(a) = parse(&["apply", "schema.toml", "--update", "--force", "--debug"])
        else {
            panic!("expected apply");
        };
        assert_eq!((a.update, a.force), (YesNo::Yes, YesNo::Yes));
        assert_eq!(a.common.debug, Some(YesNo::Yes));
        assert_eq!(a.common.project_path, std::path::PathBuf::from("."));

        let Commands::Save(s) = parse(&["save", "--start-rethinkdb"]) else {
            panic!("expected save");
        };
        assert_eq!(s.common.start_rethinkdb, YesNo::Yes);
    }

    #[test]
    fn yes_no_flags_default_to_no_and_take_explicit_values() {
        let Commands::Apply(a) = parse(&["apply", "-", "proj", "--update", "no"]) else {
            panic!("expected apply");
        };
        assert_eq!((a.update, a.force), (YesNo::No, YesNo::No));
        assert_eq!(a.common.start_rethinkdb, YesNo::No);
        assert_eq!(a.common.debug, None);
        assert_eq!(a.schema_file, "-");
        assert_eq!(a.common.project_path, std::path::PathBuf::from("proj"));
    }
}
