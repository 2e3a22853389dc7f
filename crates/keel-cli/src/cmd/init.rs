//! `keel init`: create the project skeleton.

use super::Context;
use crate::output;
use anyhow::{Context as _, Result};
use clap::Args;
use keel_core::Catalog;
use keel_core::config::{self, KEEL_DIR};
use serde::Serialize;
use tracing::info;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite `.keel/config.toml` even if it already exists.
    #[arg(long)]
    pub force: bool,
}

#[derive(Serialize)]
struct InitReport {
    root: String,
    backend: String,
    config: String,
    store: String,
}

/// Execute `keel init`:
///
/// ```text
/// .keel/
///   config.toml          (backend, validation, id layout)
///   catalog.sqlite3      (or catalog.graph.json for the graph backend)
/// ```
///
/// # Errors
///
/// Fails if `.keel/config.toml` exists without `--force`, or if the store
/// cannot be created.
pub fn run_init(args: &InitArgs, ctx: &Context) -> Result<()> {
    let root = &ctx.project_root;
    let config_path = config::config_path(root);
    if config_path.exists() && !args.force {
        anyhow::bail!("{KEEL_DIR}/ already exists. Use `keel init --force` to reinitialize.");
    }

    let config = ctx.config()?;
    let keel_dir = root.join(KEEL_DIR);
    std::fs::create_dir_all(&keel_dir)
        .with_context(|| format!("failed to create {}", keel_dir.display()))?;
    std::fs::write(&config_path, config.to_toml()?)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    // Opening creates the store file and runs migrations.
    let catalog = Catalog::open(&config, root)?;
    let store = config.store_path(root);
    info!(backend = %catalog.backend(), store = %store.display(), "initialized catalog");

    output::render(&InitReport {
        root: root.display().to_string(),
        backend: catalog.backend().to_string(),
        config: config_path.display().to_string(),
        store: store.display().to_string(),
    })
}
