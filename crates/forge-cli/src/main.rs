mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, event::EventSubcommand, job::JobSubcommand,
    proposal::ProposalSubcommand, quest::QuestSubcommand,
};
use forge_core::types::VoteDirection;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "forge",
    about = "Skill progression engine: XP ledger, levels, quests, badges and roadmap votes",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .forge/)
    #[arg(long, global = true, env = "FORGE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .forge/ with a starter config and an empty ledger
    Init,

    /// Submit progression events
    Event {
        #[command(subcommand)]
        subcommand: EventSubcommand,
    },

    /// Show a player's level, XP, stats and equipped skills
    Status { user: String },

    /// List a player's ledger events in sequence order
    History {
        user: String,
        /// Only events after this sequence number
        #[arg(long, default_value_t = 0)]
        after: u64,
    },

    /// Discard a player's cached projection and replay the ledger
    Rebuild { user: String },

    /// Compare a player's cached projection with a fresh replay
    Verify { user: String },

    /// Offer, progress and claim quests
    Quest {
        #[command(subcommand)]
        subcommand: QuestSubcommand,
    },

    /// Change job class
    Job {
        #[command(subcommand)]
        subcommand: JobSubcommand,
    },

    /// Submit and inspect roadmap proposals
    Proposal {
        #[command(subcommand)]
        subcommand: ProposalSubcommand,
    },

    /// Vote on a roadmap proposal
    Vote {
        proposal: String,
        user: String,
        /// up or down
        direction: VoteDirection,
    },

    /// Run an initial-placement assessment from a profile snapshot
    Assess {
        user: String,
        /// Snapshot JSON file (default: .forge/profiles/<user>.json)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Start the HTTP API
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "4180")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Event { subcommand } => cmd::event::run(&root, subcommand, cli.json),
        Commands::Status { user } => cmd::player::status(&root, &user, cli.json),
        Commands::History { user, after } => cmd::player::history(&root, &user, after, cli.json),
        Commands::Rebuild { user } => cmd::player::rebuild(&root, &user, cli.json),
        Commands::Verify { user } => cmd::player::verify(&root, &user, cli.json),
        Commands::Quest { subcommand } => cmd::quest::run(&root, subcommand, cli.json),
        Commands::Job { subcommand } => cmd::job::run(&root, subcommand, cli.json),
        Commands::Proposal { subcommand } => cmd::proposal::run(&root, subcommand, cli.json),
        Commands::Vote {
            proposal,
            user,
            direction,
        } => cmd::proposal::vote(&root, &proposal, &user, direction, cli.json),
        Commands::Assess { user, snapshot } => {
            cmd::assess::run(&root, &user, snapshot.as_deref(), cli.json)
        }
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
