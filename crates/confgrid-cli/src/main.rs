use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use confgrid_core::ConfgridConfig;

mod commands;

use commands::{Context, ReleaseText, Target};

#[derive(Parser)]
#[command(
    name = "confgrid",
    about = "confgrid — config release and gray-release engine",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to confgrid.toml
    #[arg(short, long, global = true, default_value = "confgrid.toml")]
    config: PathBuf,
    /// Operator recorded on every change
    #[arg(short, long, global = true, default_value = "admin")]
    operator: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a confgrid.toml scaffold
    Init {
        /// Path of the redb store the config points at
        #[arg(long, default_value = "confgrid.redb")]
        store: PathBuf,
    },
    /// Manage namespaces
    Namespace {
        #[command(subcommand)]
        action: NamespaceAction,
    },
    /// Edit namespace items
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },
    /// Manage the gray branch of a namespace
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },
    /// Release a namespace's current items
    Publish {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        text: ReleaseText,
    },
    /// Gray publish and merge
    Gray {
        #[command(subcommand)]
        action: GrayAction,
    },
    /// Roll back the latest release, or every release after --to
    Rollback {
        release_id: u64,
        #[arg(long)]
        to: Option<u64>,
    },
    /// Show a namespace: items, lock, active release and branch
    Show {
        #[command(flatten)]
        target: Target,
    },
    /// Release history of a namespace, newest first
    History {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        size: usize,
    },
}

#[derive(Subcommand)]
enum NamespaceAction {
    /// Create a master namespace
    Create {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Subcommand)]
enum ItemAction {
    /// Create or update an item
    Set {
        #[command(flatten)]
        target: Target,
        key: String,
        value: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Delete an item
    Delete {
        #[command(flatten)]
        target: Target,
        key: String,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    /// Create the gray branch
    Create {
        #[command(flatten)]
        target: Target,
    },
    /// Abandon the gray branch
    Delete {
        #[command(flatten)]
        target: Target,
        branch: String,
    },
    /// Replace the branch's targeting rules.
    ///
    /// Each rule is `client-app=ip1,ip2`; a bare `client-app` targets all
    /// of its instances.
    Rules {
        #[command(flatten)]
        target: Target,
        branch: String,
        #[arg(long = "rule")]
        rules: Vec<String>,
    },
}

#[derive(Subcommand)]
enum GrayAction {
    /// Gray publish the branch
    Publish {
        #[command(flatten)]
        target: Target,
        branch: String,
        #[command(flatten)]
        text: ReleaseText,
        /// Keys the branch should stop overriding
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },
    /// Merge the branch's items into the master and release it
    Merge {
        #[command(flatten)]
        target: Target,
        branch: String,
        #[command(flatten)]
        text: ReleaseText,
        /// Keep the branch after the merge instead of deleting it
        #[arg(long)]
        keep_branch: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ConfgridConfig::load_or_default(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    debug!(config = %cli.config.display(), store = %config.store.path.display(), "config loaded");

    let open = || Context::open(&config, &cli.operator);
    let output = match cli.command {
        Commands::Init { store } => commands::init::init(&cli.config, &store),
        Commands::Namespace { action } => match action {
            NamespaceAction::Create { target } => commands::namespace::create(&open()?, &target),
        },
        Commands::Item { action } => match action {
            ItemAction::Set {
                target,
                key,
                value,
                comment,
            } => commands::item::set(&open()?, &target, &key, &value, comment),
            ItemAction::Delete { target, key } => commands::item::delete(&open()?, &target, &key),
        },
        Commands::Branch { action } => match action {
            BranchAction::Create { target } => commands::branch::create(&open()?, &target),
            BranchAction::Delete { target, branch } => {
                commands::branch::delete(&open()?, &target, &branch)
            }
            BranchAction::Rules {
                target,
                branch,
                rules,
            } => commands::branch::rules(&open()?, &target, &branch, &rules),
        },
        Commands::Publish { target, text } => commands::release::publish(&open()?, &target, &text),
        Commands::Gray { action } => match action {
            GrayAction::Publish {
                target,
                branch,
                text,
                exclude,
            } => commands::gray::publish(&open()?, &target, &branch, &text, &exclude),
            GrayAction::Merge {
                target,
                branch,
                text,
                keep_branch,
            } => commands::gray::merge(&open()?, &target, &branch, &text, !keep_branch),
        },
        Commands::Rollback { release_id, to } => {
            commands::release::rollback(&open()?, release_id, to)
        }
        Commands::Show { target } => commands::show::show(&open()?, &target),
        Commands::History { target, page, size } => {
            commands::show::history(&open()?, &target, page, size)
        }
    }?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
