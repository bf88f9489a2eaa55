//! Developer schema setup: phased SQL files, then migrations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pg::{codes, pool, quote_ident, Db, DbPool};
use tracing::{info, warn};

/// Schema files run in this order; a file belongs to the first phase its
/// name contains.
pub const PHASES: [&str; 4] = ["extensions", "misc", "table", "alter"];

/// Order `names` by phase, then by name within a phase. Names matching no
/// phase are returned separately.
pub fn order_files(mut names: Vec<String>) -> (Vec<String>, Vec<String>) {
    names.sort();
    let mut phased: Vec<Vec<String>> = vec![Vec::new(); PHASES.len()];
    let mut skipped = Vec::new();
    for name in names {
        match PHASES.iter().position(|phase| name.contains(phase)) {
            Some(index) => phased[index].push(name),
            None => skipped.push(name),
        }
    }
    (phased.into_iter().flatten().collect(), skipped)
}

fn sql_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("cannot read schema directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_owned());
            }
        }
    }

    let (ordered, skipped) = order_files(names);
    for name in skipped {
        warn!("Skipping {name}: it matches no schema phase");
    }
    Ok(ordered.into_iter().map(|name| dir.join(name)).collect())
}

/// Run every phased schema file in `schema_dir`, then apply the migrations
/// in `migrations_dir` when it exists.
pub async fn init(db: &Db, pool: &DbPool, schema_dir: &Path, migrations_dir: &Path) -> Result<()> {
    for file in sql_files(schema_dir)? {
        info!("Running {}", file.display());
        let sql = std::fs::read_to_string(&file)
            .with_context(|| format!("cannot read {}", file.display()))?;
        db.run_sql(&sql)
            .await
            .with_context(|| format!("{} failed", file.display()))?;
    }

    if migrations_dir.is_dir() {
        pool::run_migrations(pool, migrations_dir).await?;
    } else {
        info!("No migrations directory at {}", migrations_dir.display());
    }
    Ok(())
}

/// Drop `schema` and recreate it empty, owned by the connected role, and make
/// it the default search path for this session and for the role.
pub async fn reset(db: &Db, schema: &str) -> Result<()> {
    let row = db
        .client(&db.empty_tx())
        .fetch_one("SELECT current_user AS username", &[])
        .await?;
    let username = row
        .get("username")
        .and_then(|v| v.as_str())
        .context("current_user returned no name")?
        .to_owned();

    info!("Dropping schema {schema}");
    if let Err(err) = db
        .run_sql(&format!("DROP SCHEMA {} CASCADE", quote_ident(schema)))
        .await
    {
        if !err.is_code(codes::INVALID_SCHEMA_NAME) {
            return Err(err.into());
        }
    }

    db.run_sql(&format!(
        "CREATE SCHEMA {} AUTHORIZATION {}",
        quote_ident(schema),
        quote_ident(&username)
    ))
    .await?;
    db.use_schema(schema).await?;
    db.run_sql(&format!(
        "ALTER ROLE {} SET search_path = {}, \"public\"",
        quote_ident(&username),
        quote_ident(schema)
    ))
    .await?;
    Ok(())
}
