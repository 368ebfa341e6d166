//! Clap derive structures for the `livesync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// livesync -- keep remote resources fresh and writes durable
#[derive(Debug, Parser)]
#[command(
    name = "livesync",
    version,
    about = "Watch live resources and queue writes while offline",
    long_about = "Pull resources from a REST endpoint, follow its change feed,\n\
        and deliver writes through a durable offline queue.",
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
    /// Endpoint profile to use
    #[arg(long, short = 'p', env = "LIVESYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "LIVESYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// REST endpoint URL (overrides profile)
    #[arg(long, short = 'e', env = "LIVESYNC_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Change-feed WebSocket URL (overrides profile)
    #[arg(long, env = "LIVESYNC_PUSH_URL", global = true)]
    pub push_url: Option<String>,

    /// Bearer token
    #[arg(long, env = "LIVESYNC_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "LIVESYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "LIVESYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "LIVESYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Follow a resource and print every new snapshot
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Pull a resource once, bypassing the cache
    #[command(alias = "get")]
    Fetch(FetchArgs),

    /// Submit a write; queued if the endpoint is unreachable
    Send(SendArgs),

    /// Inspect and drive the offline write queue
    #[command(alias = "q")]
    Queue(QueueArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Resource commands ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Resource name (from the profile) or path
    pub resource: String,

    /// Stop after this many snapshots
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Resource name (from the profile) or path
    pub resource: String,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Write kind; the path the payload is POSTed to
    pub kind: String,

    /// Inline JSON payload
    #[arg(long, short = 'd', conflicts_with = "file")]
    pub data: Option<String>,

    /// Read the JSON payload from a file (`-` for stdin)
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,
}

// ── Queue ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommand,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// List queued writes in delivery order
    #[command(alias = "ls")]
    List,

    /// Deliver queued writes now
    Flush,

    /// Discard every queued write
    Clear,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display the resolved configuration
    Show,

    /// Create or replace a profile from --endpoint and --push-url
    Init {
        /// Environment variable holding the bearer token
        #[arg(long)]
        token_env: Option<String>,

        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Store the bearer token (from --token / LIVESYNC_TOKEN) in the keyring
    SetToken,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
