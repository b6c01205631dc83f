//! Clap derive structures for the `cityarray` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// cityarray -- venue signage hub and sign agent
#[derive(Debug, Parser)]
#[command(
    name = "cityarray",
    version,
    about = "Keep a venue's LED signs in sync",
    long_about = "Runs the CITYARRAY hub that schedules and pushes content to\n\
        every sign, or the agent that runs on a sign and keeps it showing\n\
        sensible content when the hub is out of reach.",
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
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "CITYARRAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the hub: WebSocket listener, scheduler and liveness sweeps
    Serve(ServeArgs),

    /// Run the sign agent
    Sign(SignArgs),

    /// Inspect or create the config file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Serve ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address (overrides `hub.listen`)
    #[arg(long, short = 'l')]
    pub listen: Option<String>,
}

// ── Sign ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SignArgs {
    /// Sign id (overrides `agent.sign_id`)
    #[arg(long)]
    pub id: Option<String>,

    /// Zone to register in (overrides `agent.zone`)
    #[arg(long, short = 'z')]
    pub zone: Option<String>,

    /// Hub base URL (overrides `agent.server`)
    #[arg(long, short = 's')]
    pub server: Option<String>,

    /// Read local commands from stdin
    /// (evacuate, shelter, medical, weather, clear, reconnect)
    #[arg(long)]
    pub console: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Print the effective config (file plus environment)
    Show,

    /// Write a starter config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
