use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Base directory holding config.yaml (defaults to FAQBOT_BASE_PATH or ".")
    #[clap(long, global = true)]
    pub base_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the search index from the knowledge base CSV.
    Build {
        /// Knowledge base CSV (overrides kb_path from config)
        #[clap(long)]
        kb: Option<PathBuf>,

        /// Embedding model (overrides model from config)
        #[clap(long)]
        model: Option<String>,
    },
    /// Print the closest knowledge base entries as JSON.
    Search {
        query: String,

        /// Number of results
        #[clap(short = 'k', long, value_parser = clap::value_parser!(u64).range(1..))]
        top_k: Option<u64>,
    },
    /// Answer a single question.
    Ask {
        query: String,

        /// Knowledge base confidence threshold [0.0, 1.0]
        #[clap(short, long, value_parser = parse_threshold)]
        threshold: Option<f32>,

        /// Number of entries retrieved as context
        #[clap(short = 'k', long, value_parser = clap::value_parser!(u64).range(1..))]
        top_k: Option<u64>,
    },
    /// Interactive chat session.
    Chat {
        /// Knowledge base confidence threshold [0.0, 1.0]
        #[clap(short, long, value_parser = parse_threshold)]
        threshold: Option<f32>,
    },
    /// Start the HTTP API.
    Serve {
        /// Address to listen on (overrides bind from config)
        #[clap(long)]
        bind: Option<String>,
    },
}

pub fn parse_threshold(value: &str) -> Result<f32, String> {
    let threshold: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(format!("threshold must be between 0.0 and 1.0, got {threshold}"));
    }
    Ok(threshold)
}
