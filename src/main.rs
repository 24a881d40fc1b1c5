//! # Enron QA CLI (`eqa`)
//!
//! Builds per-user indexes, inspects each retrieval stage, answers questions,
//! and runs the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! eqa --config ./config/eqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `eqa ingest` | Build (or load) the embedding index of every user |
//! | `eqa users` | List configured users and their index status |
//! | `eqa keywords "<q>"` | Show the search keywords extracted from a question |
//! | `eqa context "<q>" --user U` | Show the context window retrieved for a question |
//! | `eqa ask "<q>" --user U` | Answer one question |
//! | `eqa chat --user U` | Interactive conversation on stdin |
//! | `eqa serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Rebuild Ken's index from scratch
//! eqa ingest --user Ken --force
//!
//! # Restrict retrieval to October 2001
//! eqa ask "What did Andy say about the audit?" --user Ken \
//!     --since 2001-10-01 --until 2001-10-31
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use enron_qa::answer::AskRequest;
use enron_qa::app::{registry_for, App};
use enron_qa::config::{self, Config};
use enron_qa::embedding::create_embedder;
use enron_qa::ingest::{run_ingest, IngestOutcome};
use enron_qa::keywords::KeywordExtractor;
use enron_qa::llm::create_language_model;
use enron_qa::models::TimeRange;
use enron_qa::progress::ProgressMode;
use enron_qa::{server, users};

/// Enron QA: question answering over one user's email.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/eqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "eqa",
    about = "Per-mailbox question answering over the Enron email corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/eqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments shared by every command that retrieves for one user.
#[derive(clap::Args)]
struct ScopeArgs {
    /// Configured user whose mailbox is searched.
    #[arg(long)]
    user: String,

    /// Only consider mail sent on or after this date (YYYY-MM-DD).
    #[arg(long)]
    since: Option<String>,

    /// Only consider mail sent on or before this date (YYYY-MM-DD).
    #[arg(long)]
    until: Option<String>,
}

impl ScopeArgs {
    fn range(&self) -> Result<TimeRange> {
        TimeRange::from_dates(self.since.as_deref(), self.until.as_deref())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the embedding index of every user (or one).
    ///
    /// Users whose index already exists are loaded and reported, not
    /// rebuilt, unless `--force` is given.
    Ingest {
        /// Only ingest this user.
        #[arg(long)]
        user: Option<String>,

        /// Rebuild even if an index exists.
        #[arg(long)]
        force: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List configured users, their mail directory, and index status.
    Users,

    /// Print the search keywords the language model extracts from a question.
    Keywords {
        question: String,
    },

    /// Print the context window retrieved for a question.
    Context {
        question: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Answer one question.
    Ask {
        question: String,

        #[command(flatten)]
        scope: ScopeArgs,

        /// Print the answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask questions read line by line from stdin, as one conversation.
    Chat {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            user,
            force,
            progress,
        } => {
            run_ingest_cmd(&cfg, user.as_deref(), force, progress).await?;
        }
        Commands::Users => {
            users::print_users(&cfg);
        }
        Commands::Keywords { question } => {
            let extractor = KeywordExtractor::new(create_language_model(&cfg.llm)?);
            for keyword in extractor.extract(&question).await? {
                println!("{}", keyword);
            }
        }
        Commands::Context { question, scope } => {
            let app = App::from_config(&cfg)?;
            let window = app
                .pipeline
                .retrieve(&question, &scope.user, &scope.range()?)
                .await?;
            if window.is_empty() {
                println!("No context found.");
            }
            for (i, chunk) in window.chunks.iter().enumerate() {
                println!(
                    "{}. {} [chunk {}] ({} words)",
                    i + 1,
                    chunk.path,
                    chunk.chunk_index,
                    chunk.word_count()
                );
                println!("    {}", chunk.text.replace('\n', "\n    "));
                println!();
            }
            println!("{} chunks, {} words", window.len(), window.word_count());
        }
        Commands::Ask {
            question,
            scope,
            json,
        } => {
            let app = App::from_config(&cfg)?;
            let answer = app
                .qa
                .ask(AskRequest {
                    query: question,
                    user: scope.user.clone(),
                    session_id: None,
                    range: scope.range()?,
                })
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.answer);
                print_sources(&answer.sources);
            }
        }
        Commands::Chat { scope } => {
            run_chat(&cfg, &scope).await?;
        }
        Commands::Serve => {
            let app = App::from_config(&cfg)?;
            server::run_server(app).await?;
        }
    }

    Ok(())
}

async fn run_ingest_cmd(
    cfg: &Config,
    user: Option<&str>,
    force: bool,
    progress: Option<ProgressMode>,
) -> Result<()> {
    let embedder = create_embedder(&cfg.embedding)?;
    let registry = registry_for(cfg, embedder.as_ref());
    let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();

    let reports = run_ingest(
        cfg,
        user,
        force,
        embedder.as_ref(),
        reporter.as_ref(),
        Some(&registry),
    )
    .await?;

    println!("Ingest ({}):", embedder.model_name());
    for report in &reports {
        let summary = match &report.outcome {
            IngestOutcome::Built { documents, chunks } => {
                format!("built: {} documents, {} chunks", documents, chunks)
            }
            IngestOutcome::Existing { chunks } => format!("existing: {} chunks", chunks),
            IngestOutcome::Skipped => "skipped: no loadable documents".to_string(),
        };
        if report.failed_files > 0 {
            println!("  {:<16} {} ({} files failed)", report.user, summary, report.failed_files);
        } else {
            println!("  {:<16} {}", report.user, summary);
        }
    }
    Ok(())
}

async fn run_chat(cfg: &Config, scope: &ScopeArgs) -> Result<()> {
    let app = App::from_config(cfg)?;
    let range = scope.range()?;
    app.pipeline.user(&scope.user)?;

    let stdin = std::io::stdin();
    let mut session_id: Option<String> = None;
    loop {
        print!("\nEnter a query: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query == "exit" {
            break;
        }
        if query.is_empty() {
            continue;
        }

        let result = app
            .qa
            .ask(AskRequest {
                query: query.to_string(),
                user: scope.user.clone(),
                session_id: session_id.clone(),
                range,
            })
            .await;
        match result {
            Ok(answer) => {
                println!("\n> Answer:\n{}", answer.answer);
                print_sources(&answer.sources);
                session_id = Some(answer.session_id);
            }
            // Keep the conversation going after a backend hiccup.
            Err(e) if e.is_retryable() => eprintln!("error: {}", e),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn print_sources(sources: &[String]) {
    if sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for source in sources {
        println!("  {}", source);
    }
}
