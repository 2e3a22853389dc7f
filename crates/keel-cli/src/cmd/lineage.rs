//! `keel lineage`: reachability queries.

use super::Context;
use crate::output;
use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum LineageCommand {
    /// Everything reachable from a node version over connection links.
    Closure { version_id: i64 },
    /// Node versions one edge version away, filtered by Edge source key.
    Adjacent {
        version_id: i64,
        /// Regex matched against the Edge item's source key.
        #[arg(long, default_value = ".*")]
        label: String,
    },
    /// Versions derived from a version through lineage edges.
    Provenance { version_id: i64 },
}

#[derive(Serialize)]
struct Reached {
    version_id: i64,
    ids: Vec<i64>,
}

pub fn run(command: LineageCommand, ctx: &Context) -> Result<()> {
    let catalog = ctx.catalog()?;
    let lineage = catalog.lineage();
    let (version_id, ids) = match command {
        LineageCommand::Closure { version_id } => {
            (version_id, lineage.transitive_closure(version_id)?)
        }
        LineageCommand::Adjacent { version_id, label } => {
            (version_id, lineage.adjacent_nodes(version_id, &label)?)
        }
        LineageCommand::Provenance { version_id } => {
            (version_id, lineage.provenance_closure(version_id)?)
        }
    };
    output::render(&Reached { version_id, ids })
}
