//! `keel version`: create and show versions of any kind.

use super::{Context, parse};
use crate::output::{self, CodedError};
use anyhow::Result;
use clap::{Args, Subcommand};
use keel_core::factory::VersionBody;
use keel_core::model::{
    EdgeBody, Endpoint, GraphBody, ItemKind, LineageEdgeBody, LineageGraphBody, NewVersion,
    NodeBody, StructureBody, Tag, ValueType, Version, tag_map,
};
use keel_core::{Catalog, ErrorCode};
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum VersionCommand {
    /// Create a version of an item.
    Create(CreateArgs),
    /// Show a version by id.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    pub kind: ItemKind,
    pub item_id: i64,
    /// Parent version id, repeatable. None means a first version.
    #[arg(long = "parent")]
    pub parents: Vec<i64>,
    /// `key=type:value`, `key=type`, or a bare `key`; repeatable.
    #[arg(long = "tag", value_parser = parse::tag)]
    pub tags: Vec<Tag>,
    /// Structure version the tags must conform to.
    #[arg(long)]
    pub structure: Option<i64>,
    #[arg(long)]
    pub reference: Option<String>,
    /// `key=value`, repeatable.
    #[arg(long = "param", value_parser = parse::parameter)]
    pub parameters: Vec<(String, String)>,
    /// Edge: `START[:END]` node version range. Lineage edge: version id.
    #[arg(long)]
    pub from: Option<String>,
    /// Edge: `START[:END]` node version range. Lineage edge: version id.
    #[arg(long)]
    pub to: Option<String>,
    /// Member version id for graph and lineage graph versions, repeatable.
    #[arg(long = "member")]
    pub members: Vec<i64>,
    /// Structure attribute `key=type`, repeatable.
    #[arg(long = "attribute", value_parser = parse::attribute)]
    pub attributes: Vec<(String, ValueType)>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub kind: ItemKind,
    pub id: i64,
}

pub fn run(command: VersionCommand, ctx: &Context) -> Result<()> {
    let catalog = ctx.catalog()?;
    match command {
        VersionCommand::Create(args) => create(&catalog, &args),
        VersionCommand::Show(args) => match args.kind {
            ItemKind::Node => show::<NodeBody>(&catalog, args.id),
            ItemKind::Edge => show::<EdgeBody>(&catalog, args.id),
            ItemKind::Graph => show::<GraphBody>(&catalog, args.id),
            ItemKind::Structure => show::<StructureBody>(&catalog, args.id),
            ItemKind::LineageEdge => show::<LineageEdgeBody>(&catalog, args.id),
            ItemKind::LineageGraph => show::<LineageGraphBody>(&catalog, args.id),
        },
    }
}

fn show<B: VersionBody + Serialize>(catalog: &Catalog, id: i64) -> Result<()> {
    output::render(&catalog.versions::<B>().retrieve(id)?)
}

fn required<'a>(value: Option<&'a str>, flag: &str, kind: ItemKind) -> Result<&'a str> {
    value.ok_or_else(|| {
        CodedError::new(
            ErrorCode::InvalidRequest,
            format!("{kind} versions need --{flag}"),
        )
        .into()
    })
}

fn version_id(raw: &str, flag: &str) -> Result<i64> {
    raw.trim().parse().map_err(|_| {
        CodedError::new(
            ErrorCode::InvalidRequest,
            format!("--{flag} '{raw}' is not a version id"),
        )
        .into()
    })
}

fn endpoint(raw: &str) -> Result<Endpoint> {
    parse::endpoint(raw).map_err(|msg| CodedError::new(ErrorCode::InvalidRequest, msg).into())
}

fn create(catalog: &Catalog, args: &CreateArgs) -> Result<()> {
    let kind = args.kind;
    let from = args.from.as_deref();
    let to = args.to.as_deref();
    match kind {
        ItemKind::Node => publish(catalog, args, NodeBody {}),
        ItemKind::Edge => {
            let body = EdgeBody {
                from: endpoint(required(from, "from", kind)?)?,
                to: endpoint(required(to, "to", kind)?)?,
            };
            publish(catalog, args, body)
        }
        ItemKind::Graph => {
            let body = GraphBody {
                edge_version_ids: args.members.clone(),
            };
            publish(catalog, args, body)
        }
        ItemKind::Structure => {
            let body = StructureBody::new(args.attributes.iter().cloned());
            publish(catalog, args, body)
        }
        ItemKind::LineageEdge => {
            let body = LineageEdgeBody {
                from_version_id: version_id(required(from, "from", kind)?, "from")?,
                to_version_id: version_id(required(to, "to", kind)?, "to")?,
            };
            publish(catalog, args, body)
        }
        ItemKind::LineageGraph => {
            let body = LineageGraphBody {
                lineage_edge_version_ids: args.members.clone(),
            };
            publish(catalog, args, body)
        }
    }
}

fn publish<B: VersionBody + Serialize>(catalog: &Catalog, args: &CreateArgs, body: B) -> Result<()> {
    let mut new = NewVersion::new(args.item_id, body)
        .with_tags(tag_map(args.tags.iter().cloned()))
        .with_parents(args.parents.iter().copied());
    if let Some(structure) = args.structure {
        new = new.with_structure(structure);
    }
    if let Some(reference) = &args.reference {
        new = new.with_reference(reference.clone());
    }
    for (key, value) in &args.parameters {
        new = new.with_parameter(key.clone(), value.clone());
    }
    let version: Version<B> = catalog.versions::<B>().create(new)?;
    output::render(&version)
}
