//! Clap derive structures for the `strata` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use strata_core::ActionKind;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// strata -- run requests through a layered data pipeline
#[derive(Debug, Parser)]
#[command(
    name = "strata",
    version,
    about = "Fetch, write and deploy data through a strata pipeline",
    long_about = "Builds the store/bucket/cache/endpoint stack from strata.toml and\n\
        runs one request through it per invocation.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to strata.toml (defaults to the platform config dir)
    #[arg(long, short = 'c', env = "STRATA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "STRATA_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable (default)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a starter strata.toml
    Init(InitArgs),

    /// List configured keys, shapes and endpoints
    Schema,

    /// Fetch the value stored under a key
    #[command(alias = "get")]
    Fetch(FetchArgs),

    /// Buffer a write action, optionally deploying it immediately
    Write(WriteArgs),

    /// Deploy pending actions for a key
    Deploy(DeployArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Data key, e.g. `users` or `users/1`
    pub key: String,

    /// Query parameter (repeatable)
    #[arg(long = "query", value_name = "NAME=VALUE", value_parser = parse_query_pair)]
    pub query: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct WriteArgs {
    /// Data key the action targets
    pub key: String,

    /// Action kind
    #[arg(long, value_enum)]
    pub kind: WriteKind,

    /// Item id inside an array key
    #[arg(long)]
    pub id: Option<String>,

    /// Dot-separated field path inside the value
    #[arg(long)]
    pub path: Option<String>,

    /// JSON payload
    #[arg(long)]
    pub value: Option<String>,

    /// Deploy right after buffering
    #[arg(long)]
    pub deploy: bool,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    pub key: String,

    /// Only deploy actions for this item id
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    pub shell: Shell,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum WriteKind {
    Update,
    Create,
    Delete,
}

impl From<WriteKind> for ActionKind {
    fn from(kind: WriteKind) -> Self {
        match kind {
            WriteKind::Update => Self::Update,
            WriteKind::Create => Self::Create,
            WriteKind::Delete => Self::Delete,
        }
    }
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}
