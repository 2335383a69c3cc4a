use hz_config::secrets::ENV_DATABASE_URL;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

const BLOG: &str = r#"
[collections.posts]
indexes = ["byDate"]

[groups.default.rules.everyone]
template = "true"
"#;

const RENDERED: &str = "# This is a TOML document\n\
                        \n\
                        [collections.posts]\n\
                        indexes = [\"byDate\"]\n\
                        \n\
                        [groups.default.rules.everyone]\n\
                        template = \"true\"\n";

/// `hz apply` then `hz save` against a real database.
///
/// DB-backed test, skipped if HZ_DATABASE_URL is not set.
#[tokio::test]
async fn cli_apply_then_save_round_trips() -> anyhow::Result<()> {
    let url = match std::env::var(ENV_DATABASE_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: HZ_DATABASE_URL not set");
            return Ok(());
        }
    };

    // Unique project name avoids collisions with other tests / local runs.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_nanos();
    let project = format!("hz_cli_test_{nanos}");

    let dir = tempdir()?;
    fs::write(dir.path().join("schema.toml"), BLOG)?;

    let mut apply = assert_cmd::Command::cargo_bin("hz")?;
    apply
        .current_dir(dir.path())
        .env(ENV_DATABASE_URL, &url)
        .args(["apply", "schema.toml", ".", "--project-name", &project]);
    apply
        .assert()
        .success()
        .stdout(predicate::str::contains("tables_created=posts"))
        .stdout(predicate::str::contains("indexes_created=posts.byDate"))
        .stdout(predicate::str::contains("noop=false"));

    // Second run is a no-op.
    let mut again = assert_cmd::Command::cargo_bin("hz")?;
    again
        .current_dir(dir.path())
        .env(ENV_DATABASE_URL, &url)
        .args(["apply", "schema.toml", "--project-name", &project]);
    again.assert().success().stdout(predicate::str::contains("noop=true"));

    let mut save = assert_cmd::Command::cargo_bin("hz")?;
    save.current_dir(dir.path())
        .env(ENV_DATABASE_URL, &url)
        .args(["save", "--project-name", &project]);
    save.assert()
        .success()
        .stdout(predicate::str::contains("out_file="));
    assert_eq!(
        fs::read_to_string(dir.path().join(".hz").join("schema.toml"))?,
        RENDERED
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await?;
    for ns in [project.clone(), format!("{project}_internal")] {
        sqlx::query(&format!("drop schema if exists \"{ns}\" cascade"))
            .execute(&pool)
            .await?;
    }

    Ok(())
}
