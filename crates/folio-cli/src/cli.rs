use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "folio", about = "Edit structured content stored in a git repository", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Folio workspace; holds session state and the checkout
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub dir: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Clone a repository into the workspace, replacing any earlier checkout
    Clone(CloneArgs),
    /// List objects with pending edits applied
    Objects(ObjectsArgs),
    /// Set a field of an object
    Set(SetArgs),
    /// Create an object
    New(NewArgs),
    /// Delete an object or one child element
    Rm(RmArgs),
    /// Show pending edits
    Status(StatusArgs),
    /// Commit and push pending edits
    Sync(SyncArgs),
    /// Push a commit whose push failed
    RetryPush(RetryPushArgs),
    /// Discard pending edits
    Reset(ResetArgs),
}

#[derive(Args)]
pub struct CloneArgs {
    pub url: String,
    #[arg(short, long)]
    pub branch: Option<String>,
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(Args)]
pub struct ObjectsArgs {
    /// Only objects of this type
    #[arg(short = 't', long = "type")]
    pub object_type: Option<String>,
}

#[derive(Args)]
pub struct SetArgs {
    pub object_type: String,
    /// Object id or unique prefix
    pub id: String,
    pub field: String,
    pub value: String,
    /// Element of a child list
    #[arg(long, requires = "child")]
    pub index: Option<usize>,
    /// Field of the child element
    #[arg(long, requires = "index")]
    pub child: Option<String>,
    /// Parse the value as JSON instead of taking it as text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct NewArgs {
    pub object_type: String,
    pub name: String,
}

#[derive(Args)]
pub struct RmArgs {
    /// Object id or unique prefix
    pub id: String,
    #[arg(long, requires = "index")]
    pub field: Option<String>,
    #[arg(long, requires = "field")]
    pub index: Option<usize>,
}

#[derive(Args)]
pub struct StatusArgs {}

#[derive(Args)]
pub struct SyncArgs {
    /// Commit author name
    #[arg(long)]
    pub name: String,
    /// Commit author email
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(Args)]
pub struct RetryPushArgs {
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(Args)]
pub struct ResetArgs {}
