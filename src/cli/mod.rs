//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "newsrag",
    version,
    author = "neur0map",
    about = "Ask questions about ingested news articles",
    long_about = "newsrag runs a background daemon that chunks and embeds news articles into a local \
                  vector store, then answers questions by retrieving the closest snippets and streaming \
                  a grounded answer from an Ollama model."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/newsrag/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground
    Serve,

    /// Start the daemon in the background
    Start,

    /// Stop the daemon
    Stop,

    /// Show daemon status and store statistics
    Status,

    /// Check whether the embedding model is loaded and the generation service reachable
    Health {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Queue a news article for ingestion
    Ingest {
        /// Article title
        #[arg(short, long)]
        title: String,

        /// Article URL
        #[arg(short, long)]
        url: String,

        /// Read article text from a file ("-" for stdin)
        #[arg(short, long, conflicts_with = "content", required_unless_present = "content")]
        file: Option<PathBuf>,

        /// Article text given inline
        #[arg(long)]
        content: Option<String>,
    },

    /// Ask a question about ingested news
    Ask {
        /// Question to ask
        question: String,

        /// Number of snippets to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print the collected answer and sources as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
