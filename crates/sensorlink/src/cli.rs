//! Clap derive structures for the `sensorlink` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// sensorlink -- poke at networked wearable sensor devices
#[derive(Debug, Parser)]
#[command(
    name = "sensorlink",
    version,
    about = "Read properties, run commands and watch signals on a sensor device",
    long_about = "Talks to a device over its REST interface (properties, commands,\n\
        self-description) and its JSON socket (signal subscriptions).",
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
    /// Device profile to use
    #[arg(long, short = 'p', env = "SENSORLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Device address, host or host:port (overrides profile)
    #[arg(long, short = 'd', env = "SENSORLINK_DEVICE", global = true)]
    pub device: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SENSORLINK_OUTPUT",
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

    /// REST request timeout in seconds (overrides profile)
    #[arg(long, env = "SENSORLINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read a property
    Get(GetArgs),

    /// Write a property
    Set(SetArgs),

    /// Run a command on an object
    Exec(ExecArgs),

    /// Show what an object exposes
    #[command(alias = "desc")]
    Describe(DescribeArgs),

    /// Subscribe to a signal and print its events
    Watch(WatchArgs),

    /// Check expected names against an object's self-description
    Check(CheckArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Properties and commands ──────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Object path, e.g. system/battery
    pub path: String,
    /// Property name
    pub name: String,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    pub path: String,
    pub name: String,
    /// New value, sent as-is
    pub value: String,
}

#[derive(Debug, Args)]
pub struct ExecArgs {
    pub path: String,
    /// Command name
    pub command: String,
    /// Arguments; each is parsed as JSON, falling back to a string
    pub args: Vec<String>,
}

#[derive(Debug, Args)]
pub struct DescribeArgs {
    pub path: String,
}

// ── Signals ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    pub path: String,
    /// Signal name
    pub signal: String,

    /// Stop after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

// ── Conformance ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CheckArgs {
    pub path: String,

    /// Expected property; suffix with `:rw` if it must be writable
    #[arg(long = "property", value_name = "NAME[:rw]")]
    pub properties: Vec<String>,

    /// Expected signal
    #[arg(long = "signal", value_name = "NAME")]
    pub signals: Vec<String>,

    /// Expected command
    #[arg(long = "command", value_name = "NAME")]
    pub commands: Vec<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Print the config file location
    Path,

    /// Create or update a profile
    Init(InitArgs),

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Device address, host or host:port
    pub address: String,

    /// Profile name
    #[arg(long, default_value = "default")]
    pub name: String,

    /// Replace an existing profile
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    pub shell: Shell,
}
