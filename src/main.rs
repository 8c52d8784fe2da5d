use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use inquire::InquireError;
use tracing_subscriber::EnvFilter;

mod assistant;
mod cli;
mod config;
mod generate;
mod knowledge;
mod lock;
mod retrieval;
#[cfg(test)]
mod tests;
mod web;

use assistant::{Assistant, Reply, ReplySource, GREETING};
use config::Config;
use generate::{Generator, OpenAiGenerator};
use retrieval::{FastEmbedder, IndexBuilder, IndexStore, SharedSearcher};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();

    let base_path = args.base_path.unwrap_or_else(config::base_path_from_env);
    let config = Config::load_with(&base_path).context("failed to load config")?;

    match args.command {
        cli::Command::Build { kb, model } => {
            let kb_path = kb.unwrap_or_else(|| config.kb_path());
            let model = model.unwrap_or_else(|| config.model.clone());

            let embedder = FastEmbedder::new(&model, config.model_cache_dir())?;
            let store = IndexStore::new(config.data_dir());
            let bundle = IndexBuilder::new(&embedder)
                .build_from_csv(&kb_path, &store)
                .with_context(|| format!("failed to build index from {}", kb_path.display()))?;

            println!("Built index with {} entries.", bundle.len());
            println!("Saved index -> {}", store.vectors_path().display());
            println!("Saved metadata -> {}", store.meta_path().display());
            Ok(())
        }

        cli::Command::Search { query, top_k } => {
            let searcher = SharedSearcher::from_config(config.clone()).get()?;
            let top_k = top_k.map_or(config.top_k, |k| k as usize);

            let results = searcher.search(&query, top_k)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }

        cli::Command::Ask {
            query,
            threshold,
            top_k,
        } => {
            let assistant = create_assistant(&config)?;
            let threshold = threshold.unwrap_or(config.threshold);
            let top_k = top_k.map_or(config.top_k, |k| k as usize);

            let mut streamed = false;
            let reply = assistant.respond_with(&query, threshold, top_k, |chunk| {
                streamed = true;
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            })?;
            print_reply(&reply, streamed);
            Ok(())
        }

        cli::Command::Chat { threshold } => {
            let assistant = create_assistant(&config)?;
            let mut threshold = threshold.unwrap_or(config.threshold);

            println!("{GREETING}");
            println!("(/threshold <0..1> adjusts knowledge base confidence, /quit exits)");

            loop {
                let prompt = match inquire::Text::new("You:").prompt() {
                    Ok(prompt) => prompt,
                    Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                        break;
                    }
                    Err(err) => return Err(err).context("failed to read input"),
                };

                let prompt = prompt.trim();
                if prompt.is_empty() {
                    continue;
                }
                if prompt == "/quit" {
                    break;
                }
                if let Some(value) = prompt.strip_prefix("/threshold") {
                    match cli::parse_threshold(value) {
                        Ok(value) => {
                            threshold = value;
                            println!("Knowledge base confidence set to {threshold:.2}");
                        }
                        Err(msg) => println!("{msg}"),
                    }
                    continue;
                }

                let mut streamed = false;
                let reply = assistant.respond(prompt, threshold, |chunk| {
                    streamed = true;
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                })?;
                print_reply(&reply, streamed);
            }
            Ok(())
        }

        cli::Command::Serve { bind } => {
            let assistant = create_assistant(&config)?;
            let bind = bind.unwrap_or_else(|| config.bind.clone());
            web::start_daemon(assistant, &bind, config.threshold)
        }
    }
}

/// Load the searcher once and attach the optional generator.
fn create_assistant(config: &Config) -> anyhow::Result<Assistant> {
    let searcher = SharedSearcher::from_config(config.clone())
        .get()
        .context("failed to load search index")?;

    let generator = OpenAiGenerator::from_env(&config.generator)?
        .map(|g| Box::new(g) as Box<dyn Generator>);

    Ok(Assistant::new(Arc::clone(&searcher), generator, config.top_k))
}

fn print_reply(reply: &Reply, streamed: bool) {
    match &reply.source {
        ReplySource::KnowledgeBase { score, question } => {
            println!("{}", reply.text);
            println!("-- From Knowledge Base (match: {score:.2}) - source: \"{question}\"");
        }
        ReplySource::Generated => println!(),
        ReplySource::Apology => {
            if streamed {
                println!();
            }
            println!("{}", reply.text);
        }
        ReplySource::NoGenerator => println!("{}", reply.text),
    }
}
