#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use keel_core::storage::Backend;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "keel: versioned metadata catalog",
    long_about = None
)]
struct Cli {
    /// Project root holding `.keel/` (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Storage backend, overriding config and KEEL_BACKEND.
    #[arg(long, global = true, value_name = "sqlite|graph")]
    backend: Option<Backend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create `.keel/` with a config file and an empty store.
    Init(cmd::init::InitArgs),

    /// Create and inspect items.
    #[command(subcommand)]
    Item(cmd::item::ItemCommand),

    /// Create and inspect versions.
    #[command(subcommand)]
    Version(cmd::version::VersionCommand),

    /// Reachability queries over versions.
    #[command(subcommand)]
    Lineage(cmd::lineage::LineageCommand),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KEEL_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "keel=debug,info"
        } else {
            "keel=info,warn"
        })
    });

    let format = env::var("KEEL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let project_root = match cli.root {
        Some(root) => root,
        None => env::current_dir()?,
    };
    debug!(root = %project_root.display(), "resolved project root");
    let ctx = cmd::Context {
        project_root,
        backend: cli.backend,
    };

    match cli.command {
        Commands::Init(args) => cmd::init::run_init(&args, &ctx),
        Commands::Item(command) => cmd::item::run(command, &ctx),
        Commands::Version(command) => cmd::version::run(command, &ctx),
        Commands::Lineage(command) => cmd::lineage::run(command, &ctx),
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::render_error(&err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["keel", "lineage", "closure", "7", "--backend", "graph"]);
        assert_eq!(cli.backend, Some(Backend::Graph));
        assert!(matches!(cli.command, Commands::Lineage(_)));
    }

    #[test]
    fn root_flag_parses_before_subcommand() {
        let cli = Cli::parse_from(["keel", "--root", "/tmp/project", "init"]);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/project")));
        assert!(cli.backend.is_none());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = Cli::try_parse_from(["keel", "--backend", "oracle", "init"])
            .expect_err("bad backend");
        assert!(err.to_string().contains("unknown backend"));
    }

    #[test]
    fn item_create_parses_tags() {
        let cli = Cli::parse_from([
            "keel", "item", "create", "node", "orders", "--tag", "rows=long:12",
        ]);
        assert!(matches!(cli.command, Commands::Item(_)));
    }
}
