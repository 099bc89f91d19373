//! # uridx CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `uridx init` | Create the database and run migrations |
//! | `uridx ingest` | Ingest JSON Lines (or `--text <uri>` raw text) from stdin |
//! | `uridx search "<query>"` | Semantic search |
//! | `uridx stats` | Index counters |
//! | `uridx get <uri>` | Show a source with its chunks |
//! | `uridx delete <uri>` | Remove a source |
//! | `uridx extract markdown [PATH]` | Emit ingestion records for markdown files |
//! | `uridx extract claude-code [PATH]` | Emit one record per Claude Code session log |
//! | `uridx serve [--http]` | MCP over stdio, or the HTTP tool API |
//! | `uridx completions <shell>` | Print shell completions |
//!
//! Logs go to stderr; stdout carries only command output.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use uridx::config::{self, Config};
use uridx::index::Index;
use uridx::ingest::TextOptions;
use uridx::sqlite_store::SqliteStore;
use uridx::{extract, get, ingest, mcp, search, server, stats};

/// uridx: a personal semantic index for notes, conversations and documents.
#[derive(Parser)]
#[command(name = "uridx", version, about)]
struct Cli {
    /// Path to a TOML configuration file. Optional; environment variables
    /// override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and schema. Safe to run repeatedly.
    Init,

    /// Ingest from stdin.
    ///
    /// By default stdin is JSON Lines, one record per line:
    /// {"source_uri": "...", "title": "...", "tags": [...], "chunks": [{"text": "..."}]}.
    /// With --text, stdin is a single raw text body split on paragraphs.
    Ingest {
        /// Read stdin as JSON Lines (the default).
        #[arg(long, conflicts_with = "text")]
        jsonl: bool,

        /// Treat stdin as one text body stored under this uri.
        #[arg(long, value_name = "URI")]
        text: Option<String>,

        /// Title for --text input.
        #[arg(long, requires = "text")]
        title: Option<String>,

        /// Source type for --text input (default: note).
        #[arg(long = "type", requires = "text")]
        source_type: Option<String>,

        /// Tag for --text input. Repeatable.
        #[arg(long = "tag", requires = "text")]
        tags: Vec<String>,

        /// Re-embed every chunk even if its text is unchanged.
        #[arg(long)]
        replace: bool,
    },

    /// Search the index by meaning.
    Search {
        query: String,

        /// Only sources carrying this tag. Repeatable; all must match.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Only sources of this type.
        #[arg(long = "type")]
        source_type: Option<String>,

        /// Only sources whose uri starts with this prefix.
        #[arg(long)]
        prefix: Option<String>,

        /// Maximum number of results.
        #[arg(short = 'n', long)]
        limit: Option<i64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index counters.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Show a source and its chunks.
    Get {
        uri: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete a source with its chunks and vectors.
    Delete { uri: String },

    /// Turn files into JSON Lines ingestion records on stdout.
    Extract {
        #[command(subcommand)]
        kind: ExtractKind,
    },

    /// Serve the tools over MCP (stdio) or HTTP.
    Serve {
        /// Serve the JSON tool API on `server.bind` instead of MCP stdio.
        #[arg(long)]
        http: bool,
    },

    /// Print shell completions.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum ExtractKind {
    /// Markdown files, split by headings.
    Markdown {
        /// File or directory (default: current directory).
        path: Option<PathBuf>,
    },
    /// Claude Code session logs, one record per session.
    ClaudeCode {
        /// Projects directory (default: ~/.claude/projects).
        path: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_index(config: Config) -> anyhow::Result<Arc<Index>> {
    Ok(Arc::new(Index::open(config).await?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config;
    let load = || config::load_config(config_path.as_deref());

    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "uridx", &mut std::io::stdout());
        }
        Commands::Extract {
            kind: ExtractKind::Markdown { path },
        } => {
            extract::run_extract_markdown(path)?;
        }
        Commands::Extract {
            kind: ExtractKind::ClaudeCode { path },
        } => {
            extract::run_extract_claude_code(path)?;
        }
        Commands::Init => {
            let cfg = load()?;
            let store = SqliteStore::open(&cfg.db.path).await?;
            store.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest {
            jsonl: _,
            text,
            title,
            source_type,
            tags,
            replace,
        } => {
            let index = open_index(load()?).await?;
            let text = text.map(|uri| TextOptions {
                uri,
                title,
                source_type,
                tags,
                replace,
            });
            ingest::run_ingest(&index, text, replace).await?;
        }
        Commands::Search {
            query,
            tags,
            source_type,
            prefix,
            limit,
            json,
        } => {
            let index = open_index(load()?).await?;
            let mut request = index.search_request(query);
            if let Some(limit) = limit {
                request = request.with_limit(limit);
            }
            if let Some(ty) = source_type {
                request = request.with_type(ty);
            }
            if let Some(prefix) = prefix {
                request = request.with_uri_prefix(prefix);
            }
            for tag in tags {
                request = request.with_tag(tag);
            }
            search::run_search(&index, &request, json).await?;
        }
        Commands::Stats { json } => {
            let index = open_index(load()?).await?;
            stats::run_stats(&index, json).await?;
        }
        Commands::Get { uri, json } => {
            let index = open_index(load()?).await?;
            get::run_get(&index, &uri, json).await?;
        }
        Commands::Delete { uri } => {
            let index = open_index(load()?).await?;
            get::run_delete(&index, &uri).await?;
        }
        Commands::Serve { http } => {
            let index = open_index(load()?).await?;
            if http {
                server::run_server(index).await?;
            } else {
                mcp::run_stdio(index).await?;
            }
        }
    }

    Ok(())
}
