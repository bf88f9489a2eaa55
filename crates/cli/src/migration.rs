//! New migration files, in the reversible layout the sqlx migrator reads.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

/// `Add Users-Table` -> `add_users_table`.
pub fn description(name: &str) -> Result<String> {
    let words: Vec<String> = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    if words.is_empty() {
        bail!("migration name {name:?} has no letters or digits");
    }
    Ok(words.join("_"))
}

/// Write `<version>_<name>.up.sql` and `.down.sql` into `dir`, the version
/// being `now` as `YYYYMMDDHHMMSS`. Existing files are never overwritten.
pub fn create(dir: &Path, name: &str, now: DateTime<Utc>) -> Result<(PathBuf, PathBuf)> {
    let stem = format!("{}_{}", now.format("%Y%m%d%H%M%S"), description(name)?);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create migrations directory {}", dir.display()))?;

    let up = dir.join(format!("{stem}.up.sql"));
    let down = dir.join(format!("{stem}.down.sql"));
    write_new(&up, "-- Add up migration script here\n")?;
    write_new(&down, "-- Add down migration script here\n")?;
    info!("Created {} and {}", up.display(), down.display());
    Ok((up, down))
}

fn write_new(path: &Path, contents: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}
