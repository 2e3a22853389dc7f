pub mod init;
pub mod item;
pub mod lineage;
pub mod parse;
pub mod version;

use crate::output::CodedError;
use anyhow::Context as _;
use keel_core::config::{self, KEEL_DIR, KeelConfig};
use keel_core::storage::Backend;
use keel_core::{Catalog, ErrorCode};
use std::path::PathBuf;

/// Global flags shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub project_root: PathBuf,
    pub backend: Option<Backend>,
}

impl Context {
    /// Project config with env and `--backend` overrides applied.
    pub fn config(&self) -> anyhow::Result<KeelConfig> {
        let config = config::resolve_config(&self.project_root)?;
        Ok(match self.backend {
            Some(backend) => config.with_backend(backend),
            None => config,
        })
    }

    /// Open the project's catalog; the project must have been initialized.
    pub fn catalog(&self) -> anyhow::Result<Catalog> {
        let keel_dir = self.project_root.join(KEEL_DIR);
        if !keel_dir.is_dir() {
            return Err(CodedError::new(
                ErrorCode::NotInitialized,
                format!("no {KEEL_DIR}/ under {}", self.project_root.display()),
            )
            .into());
        }
        let config = self.config()?;
        Catalog::open(&config, &self.project_root).with_context(|| {
            format!(
                "opening {} store at {}",
                config.storage.backend,
                config.store_path(&self.project_root).display()
            )
        })
    }
}
