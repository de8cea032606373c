use anyhow::Result;
use clap::{Parser, Subcommand};
use flowdoc_qa::commands::{
    ask_question, delete_document, forget_history_entry, ingest_document, list_documents,
    reset_vectors, show_history, show_status,
};
use flowdoc_qa::config::{BASE_DIR_ENV, Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flowdoc-qa")]
#[command(about = "Question answering over process documents and their flowcharts")]
#[command(version)]
struct Cli {
    /// Directory holding the configuration, databases and page images
    #[arg(long, global = true, env = BASE_DIR_ENV)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Ingest a directory of rendered page images as one document
    Ingest {
        /// Directory with one image per page, numbered by the trailing digits of each file name
        pages_dir: PathBuf,
        /// Document name; defaults to the directory name
        #[arg(long)]
        name: Option<String>,
        /// Original source file, recorded with the document
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Ask a question about an ingested document
    Ask {
        /// Document id
        document: String,
        question: String,
        /// Number of candidates retrieved before ranking
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// List all ingested documents
    List,
    /// Delete a document and everything derived from it
    Delete {
        /// Document id
        document: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Show recorded questions and answers for a document
    History {
        /// Document id
        document: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Delete one recorded question and answer
    Forget {
        /// History entry id, as shown by `history`
        entry: String,
    },
    /// Show store health and statistics
    Status,
    /// Delete all stored embeddings
    ResetVectors {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => Config::default_base_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&base_dir)?;
            } else {
                run_interactive_config(&base_dir)?;
            }
        }
        Commands::Ingest {
            pages_dir,
            name,
            source,
        } => {
            ingest_document(&Config::load(&base_dir)?, pages_dir, name, source).await?;
        }
        Commands::Ask {
            document,
            question,
            top_k,
        } => {
            ask_question(&Config::load(&base_dir)?, document, question, top_k).await?;
        }
        Commands::List => {
            list_documents(&Config::load(&base_dir)?).await?;
        }
        Commands::Delete { document, yes } => {
            delete_document(&Config::load(&base_dir)?, &document, yes).await?;
        }
        Commands::History { document, limit } => {
            show_history(&Config::load(&base_dir)?, &document, limit).await?;
        }
        Commands::Forget { entry } => {
            forget_history_entry(&Config::load(&base_dir)?, &entry).await?;
        }
        Commands::Status => {
            show_status(&Config::load(&base_dir)?).await?;
        }
        Commands::ResetVectors { yes } => {
            reset_vectors(&Config::load(&base_dir)?, yes).await?;
        }
    }

    Ok(())
}
