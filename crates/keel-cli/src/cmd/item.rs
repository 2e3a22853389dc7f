//! `keel item`: create items and inspect their histories.

use super::{Context, parse};
use crate::output::{self, CodedError};
use anyhow::Result;
use clap::{Args, Subcommand};
use keel_core::dag::VersionSuccessor;
use keel_core::model::{Item, ItemKind, NewItem, Tag, tag_map};
use keel_core::{Catalog, ErrorCode};
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum ItemCommand {
    /// Create an item.
    Create(CreateArgs),
    /// Show an item by source key or id.
    Show(ShowArgs),
    /// List the current leaf version ids.
    Leaves(KeyArgs),
    /// Keep only the most recent generations of history.
    Truncate(TruncateArgs),
    /// Dump the version history DAG.
    Dag(KeyArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// node, edge, graph, structure, lineage_edge, or lineage_graph.
    pub kind: ItemKind,
    pub source_key: String,
    #[arg(long)]
    pub name: Option<String>,
    /// `key=type:value`, `key=type`, or a bare `key`; repeatable.
    #[arg(long = "tag", value_parser = parse::tag)]
    pub tags: Vec<Tag>,
    /// Source Node item id (edge items only).
    #[arg(long, requires = "to")]
    pub from: Option<i64>,
    /// Target Node item id (edge items only).
    #[arg(long, requires = "from")]
    pub to: Option<i64>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub kind: ItemKind,
    #[arg(required_unless_present = "id")]
    pub source_key: Option<String>,
    #[arg(long, conflicts_with = "source_key")]
    pub id: Option<i64>,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    pub kind: ItemKind,
    pub source_key: String,
}

#[derive(Args, Debug)]
pub struct TruncateArgs {
    pub kind: ItemKind,
    pub source_key: String,
    /// Generations to keep behind each leaf.
    #[arg(long)]
    pub height: usize,
}

#[derive(Serialize)]
struct Leaves {
    item_id: i64,
    leaves: Vec<i64>,
}

#[derive(Serialize)]
struct DagDump {
    item_id: i64,
    successors: Vec<VersionSuccessor>,
    leaves: Vec<i64>,
}

pub fn run(command: ItemCommand, ctx: &Context) -> Result<()> {
    let catalog = ctx.catalog()?;
    match command {
        ItemCommand::Create(args) => output::render(&create(&catalog, args)?),
        ItemCommand::Show(args) => {
            let items = catalog.items(args.kind);
            let item = match (args.id, args.source_key) {
                (Some(id), _) => items.retrieve_by_id(id)?,
                (None, Some(key)) => items.retrieve(&key)?,
                (None, None) => {
                    return Err(CodedError::new(
                        ErrorCode::InvalidRequest,
                        "give a source key or --id",
                    )
                    .into());
                }
            };
            output::render(&item)
        }
        ItemCommand::Leaves(args) => {
            let items = catalog.items(args.kind);
            let item = items.retrieve(&args.source_key)?;
            output::render(&Leaves {
                item_id: item.id,
                leaves: items.get_leaves(&args.source_key)?,
            })
        }
        ItemCommand::Truncate(args) => {
            let items = catalog.items(args.kind);
            let item = items.retrieve(&args.source_key)?;
            output::render(&items.truncate(item.id, args.height)?)
        }
        ItemCommand::Dag(args) => {
            let item = catalog.items(args.kind).retrieve(&args.source_key)?;
            let dag = catalog.dag(item.id)?;
            output::render(&DagDump {
                item_id: item.id,
                successors: dag.successors().copied().collect(),
                leaves: dag.leaves(),
            })
        }
    }
}

fn create(catalog: &Catalog, args: CreateArgs) -> Result<Item> {
    let mut new = NewItem::new(args.source_key).with_tags(tag_map(args.tags));
    if let Some(name) = args.name {
        new = new.named(name);
    }
    if let (Some(from), Some(to)) = (args.from, args.to) {
        new = new.between(from, to);
    }
    Ok(catalog.items(args.kind).create(new)?)
}
