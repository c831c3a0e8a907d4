use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "memtree")]
#[command(version, about = "memtree - inspect bounded conversation memory")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (defaults to ~/.local/share/memtree/memtree.redb)
    #[arg(long, global = true, env = "MEMTREE_DB_PATH")]
    pub db_path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the turns of a conversation
    Turns(TurnsArgs),

    /// Show the live summary stack, bottom to top
    Stack(ChatArgs),

    /// Show the merge tree under every live node
    Tree(ChatArgs),

    /// Show every leaf with the turns it was compacted from
    Lineage(ChatArgs),

    /// Check the live stack for repeated sizes
    Check(ChatArgs),

    /// Show the effective configuration
    Config,
}

#[derive(Args)]
pub struct ChatArgs {
    /// Conversation id
    pub chat_id: String,
}

#[derive(Args)]
pub struct TurnsArgs {
    /// Conversation id
    pub chat_id: String,

    /// Include turns already evicted from the window
    #[arg(long)]
    pub all: bool,
}
