//! Clap derive structures for the `racelobby` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// racelobby -- browse racing servers from the lobby, the LAN and your lists
#[derive(Debug, Parser)]
#[command(
    name = "racelobby",
    version,
    about = "Browse racing game servers from the command line",
    long_about = "Aggregates the public lobby list, LAN broadcast discovery and\n\
        file-backed lists (favourites, hidden, ...) into one deduplicated\n\
        server list, optionally probing every server for ping and occupancy.",
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
    /// Config file (defaults to the platform config path)
    #[arg(long, env = "RACELOBBY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Lobby base URL (overrides config)
    #[arg(long, env = "RACELOBBY_LOBBY_URL", global = true)]
    pub lobby_url: Option<String>,

    /// Directory holding list files (overrides config)
    #[arg(long, env = "RACELOBBY_LISTS_DIR", global = true)]
    pub lists_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides config)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
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
    /// Load servers from the selected sources and list them
    #[command(alias = "s")]
    Scan(ScanArgs),

    /// Show and edit file-backed lists
    #[command(alias = "l")]
    Lists(ListsArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Scan ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Source keys to load (repeatable); all visible sources when omitted
    #[arg(long, short = 's')]
    pub source: Vec<String>,

    /// Skip LAN discovery
    #[arg(long)]
    pub no_lan: bool,

    /// Probe every server for ping and occupancy after loading
    #[arg(long, short = 'p')]
    pub ping: bool,

    /// Probe servers with free slots first
    #[arg(long, requires = "ping")]
    pub prefer_free: bool,

    /// Probe servers whose name contains this text first
    #[arg(long, requires = "ping")]
    pub prefer_name: Option<String>,

    /// Include servers hidden by an excluding list
    #[arg(long)]
    pub include_excluded: bool,

    /// Sort order
    #[arg(long, default_value = "drivers")]
    pub sort: SortKey,

    /// Show at most this many servers
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortKey {
    /// Most connected drivers first
    Drivers,
    /// Lowest ping first, unprobed last
    Ping,
    /// Alphabetical
    Name,
}

// ── Lists ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ListsArgs {
    #[command(subcommand)]
    pub command: ListsCommand,
}

#[derive(Debug, Subcommand)]
pub enum ListsCommand {
    /// Show every list, or the servers in one list
    #[command(alias = "ls")]
    Show {
        /// List key (e.g. favourites)
        list: Option<String>,
    },

    /// Add a server to a list, creating the list if needed
    Add {
        /// List key (e.g. favourites)
        list: String,
        /// Server id, usually host:http_port
        server: String,
        /// Display name stored next to the id
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove a server from a list
    #[command(alias = "rm")]
    Remove {
        /// List key (e.g. favourites)
        list: String,
        /// Server id, usually host:http_port
        server: String,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}
