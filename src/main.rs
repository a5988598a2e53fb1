use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use mygemini::archive::{ArchiveRecord, ArchiveStore};
use mygemini::config::Config;
use mygemini::engine::{listener_channel, Engine};
use mygemini::speech;
use mygemini::transcript::Transcript;

#[derive(Parser)]
#[command(name = "mygemini")]
#[command(about = "Ask Gemini from a desktop dialog, hear the answer, search past answers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the question dialog
    #[cfg(feature = "gui")]
    Gui,
    /// Ask a single question and print the transcript
    Ask {
        /// The question to send
        question: String,
    },
    /// Show archived questions and answers
    History {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Search archived questions and answers
    Search {
        /// Substring to look for
        term: String,
    },
    /// Delete all archived questions and answers
    HistoryClear,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    if let Err(e) = dotenv::dotenv() {
        info!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| dirs::config_dir().map(|d| d.join("mygemini/config.toml")))
        .ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;

    let rt = tokio::runtime::Runtime::new()?;
    let mut config = rt.block_on(Config::load(&config_path))?;
    config.apply_env();

    match cli.command {
        #[cfg(feature = "gui")]
        Some(Commands::Gui) | None => {
            drop(rt);
            config.require_api_key()?;
            sweep_speech_dir(&config);
            info!("Starting Mygemini dialog");
            mygemini::gui::run_gui(config)?;
        }
        #[cfg(not(feature = "gui"))]
        None => {
            anyhow::bail!("Built without the gui feature; use the `ask` command");
        }
        Some(Commands::Ask { question }) => {
            config.require_api_key()?;
            sweep_speech_dir(&config);
            rt.block_on(ask_once(config, &question))?;
        }
        Some(Commands::History { limit }) => {
            show_history(&config, limit)?;
        }
        Some(Commands::Search { term }) => {
            search_history(&config, &term)?;
        }
        Some(Commands::HistoryClear) => {
            clear_history(&config)?;
        }
    }

    Ok(())
}

fn sweep_speech_dir(config: &Config) {
    if config.speech.enabled {
        speech::sweep_stale_files(Path::new(&config.speech.temp_dir));
    }
}

async fn ask_once(config: Config, question: &str) -> Result<()> {
    let (tx, rx) = listener_channel();
    let mut engine = Engine::new(config)?.with_listener(tx);

    engine.ask(question).await;
    engine.shutdown().await;

    let mut transcript = Transcript::new();
    while let Ok(msg) = rx.try_recv() {
        transcript.apply(&msg);
    }
    println!("{}", transcript.render());
    Ok(())
}

fn open_archive(config: &Config) -> Result<Option<ArchiveStore>> {
    let db_path = PathBuf::from(&config.archive.path);
    if !db_path.exists() {
        return Ok(None);
    }
    Ok(Some(ArchiveStore::open(&db_path, config.archive.max_entries)?))
}

fn print_records(records: &[ArchiveRecord], preview_chars: usize) {
    for record in records {
        println!(
            "[{}] Q: {} | A: {}",
            record.create_at,
            ArchiveRecord::preview(&record.question, preview_chars),
            ArchiveRecord::preview(&record.answer, preview_chars)
        );
    }
    println!("\n{} entries shown.", records.len());
}

fn show_history(config: &Config, limit: u32) -> Result<()> {
    let Some(store) = open_archive(config)? else {
        println!("No history found.");
        return Ok(());
    };

    let records = store.list(limit)?;
    if records.is_empty() {
        println!("No archived answers.");
        return Ok(());
    }

    print_records(&records, config.archive.preview_chars);
    Ok(())
}

fn search_history(config: &Config, term: &str) -> Result<()> {
    let Some(store) = open_archive(config)? else {
        println!("No history found.");
        return Ok(());
    };

    let records = store.search(term.trim())?;
    if records.is_empty() {
        println!("No archived answers match '{}'.", term.trim());
        return Ok(());
    }

    print_records(&records, config.archive.preview_chars);
    Ok(())
}

fn clear_history(config: &Config) -> Result<()> {
    let Some(store) = open_archive(config)? else {
        println!("No history to clear.");
        return Ok(());
    };

    store.clear()?;
    if !config.archive.enabled {
        warn!("Archive is disabled in config; cleared the existing file anyway");
    }
    println!("History cleared.");
    Ok(())
}
