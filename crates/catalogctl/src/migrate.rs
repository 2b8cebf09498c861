use std::path::PathBuf;

use anyhow::Context;

use crate::render::render_one;

/// Project a catalog into a relational database, preserving the upgrade
/// graph's replaces and skips semantics.
#[derive(Debug, clap::Args)]
pub struct MigrateArgs {
    /// Catalog reference to project
    reference: String,

    /// Path of the database to produce; an existing file is truncated
    db_path: PathBuf,
}

pub fn run(args: MigrateArgs) -> anyhow::Result<()> {
    let cfg = render_one(&args.reference)?;
    let m = declcfg::convert_to_model(&cfg)
        .with_context(|| format!("reference {:?} is not a valid catalog", args.reference))?;

    // Create or truncate the database at the given path.
    std::fs::write(&args.db_path, [])
        .with_context(|| format!("failed to create {}", args.db_path.display()))?;
    let mut conn = rusqlite::Connection::open(&args.db_path)
        .with_context(|| format!("failed to open {}", args.db_path.display()))?;

    sqlite::write(&mut conn, &m).context("failed to migrate catalog")?;
    tracing::info!(path = %args.db_path.display(), "wrote relational catalog");
    Ok(())
}
