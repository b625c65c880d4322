//! # litrev
//!
//! The `litrev` binary drives a literature review: import bibliography items,
//! index their full text, define typed queries per project, and let an LLM
//! answer them over the retrieved passages.
//!
//! ## Usage
//!
//! ```bash
//! litrev --config ./config/litrev.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `litrev init` | Create the SQLite database and run schema migrations |
//! | `litrev import <path>` | Import items from JSON, JSONL or a text directory |
//! | `litrev index` | Chunk and embed every item with text |
//! | `litrev items` | List imported items |
//! | `litrev get <key>` | Show one item with its passages and projects |
//! | `litrev stats` | Database and backend overview |
//! | `litrev project ...` | Create projects, manage their items, run all queries |
//! | `litrev query ...` | Create, run and inspect queries of a project |
//! | `litrev ask` | One-off prompt over a project, an item or everything |
//! | `litrev search "<phrase>"` | Similarity search over passages |
//! | `litrev topics <project> <query>` | Cluster a query's answers into topics |
//! | `litrev export <project>` | Export items and parsed answers as JSON |
//!
//! ## Examples
//!
//! ```bash
//! # Import a Zotero-style JSON export and index it
//! litrev import papers.json --project review --collection cs-ed --index
//!
//! # Ask a yes/no question of every paper in the project
//! litrev query create review empirical --question "Is the study empirical?"
//! litrev query run review empirical
//!
//! # Which papers answered yes?
//! litrev query filter review empirical yes
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use litreview::config;
use litreview::export;
use litreview::get;
use litreview::ingest::{self, ImportOptions};
use litreview::logging;
use litreview::migrate;
use litreview::progress::ProgressMode;
use litreview::project_cmd;
use litreview::query_cmd::{self, PromptSource};
use litreview::search;
use litreview::stats;
use litreview::topics_cmd::{self, TopicOptions};

/// litrev: retrieval-augmented literature reviews.
#[derive(Parser)]
#[command(name = "litrev", version, about = "litrev: retrieval-augmented literature reviews")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "./config/litrev.toml")]
    config: PathBuf,

    /// Log progress of backend calls to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and runs all migrations. Safe to
    /// run multiple times.
    Init,

    /// Import bibliography items.
    ///
    /// Accepts a JSON array, a JSONL file or a directory of text files.
    /// Existing items with the same key are updated in place.
    Import {
        /// Import file or directory.
        path: PathBuf,

        /// Add the imported items to this project (created if missing).
        #[arg(long)]
        project: Option<String>,

        /// Tag the imported items with this collection.
        #[arg(long)]
        collection: Option<String>,

        /// Index the imported items right away.
        #[arg(long)]
        index: bool,

        /// Glob for directory imports (repeatable). Defaults to `**/*.txt` and `**/*.md`.
        #[arg(long = "include")]
        include: Vec<String>,
    },

    /// Chunk and embed all items that have text.
    ///
    /// Already indexed items are skipped unless `--redo` is given.
    Index {
        /// Drop the whole index and rebuild it.
        #[arg(long)]
        redo: bool,

        /// Progress output on stderr.
        #[arg(long, value_enum, default_value_t = ProgressMode::default_for_tty())]
        progress: ProgressMode,
    },

    /// List imported items.
    Items,

    /// Show one item by key.
    ///
    /// Prints the item's metadata, its passages and the projects it belongs to.
    Get {
        /// Item key.
        key: String,
    },

    /// Show database statistics and configured backends.
    Stats,

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage and run queries.
    Query {
        #[command(subcommand)]
        action: QueryAction,
    },

    /// Ask a one-off prompt without storing the answer.
    Ask {
        #[command(flatten)]
        prompt: PromptSource,

        /// Restrict retrieval to this project's items.
        #[arg(long)]
        project: Option<String>,

        /// Restrict retrieval to one item.
        #[arg(long)]
        item: Option<String>,

        /// Print the retrieved context before the answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Similarity search over indexed passages.
    Search {
        /// Search phrase.
        phrase: String,

        /// Restrict the search to this project's items.
        #[arg(long)]
        project: Option<String>,

        /// Restrict the search to one item.
        #[arg(long)]
        item: Option<String>,

        /// Number of passages to return (defaults to `[retrieval].k`).
        #[arg(short, long)]
        k: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Cluster the answers of a query into topics.
    Topics {
        /// Project name.
        project: String,

        /// Query name.
        query: String,

        /// Smallest group that counts as a topic.
        #[arg(long)]
        min_cluster_size: Option<usize>,

        /// Seed for the projection.
        #[arg(long)]
        seed: Option<u64>,

        /// Skip LLM topic labels and use keywords.
        #[arg(long)]
        no_label: bool,

        /// List the answers assigned to one topic (`-1` for outliers).
        #[arg(long, allow_hyphen_values = true)]
        topic: Option<i64>,

        /// Print the item by topic count matrix.
        #[arg(long)]
        matrix: bool,

        /// With --matrix, print 1 where an item touches a topic instead of counts.
        #[arg(long)]
        presence: bool,

        /// Print the mean topic share per publication year.
        #[arg(long)]
        by_year: bool,

        /// Drop the answers of a topic and fit again (repeatable, `-1` for outliers).
        #[arg(long, allow_hyphen_values = true)]
        exclude: Vec<i64>,

        /// Print the full topic model as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Export a project's items and parsed answers as JSON.
    Export {
        /// Project name.
        project: String,

        /// Output file. Writes to stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Project subcommands.
#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project.
    Create {
        name: String,
        /// Succeed if the project already exists.
        #[arg(long)]
        exists_ok: bool,
    },
    /// Delete a project with its queries and responses. Items are kept.
    Delete { name: String },
    /// List projects.
    List,
    /// List the items of a project.
    Items { name: String },
    /// Add items by key.
    AddItems {
        name: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Remove items by key.
    RemoveItems {
        name: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Add every item of a collection.
    AddCollection { name: String, collection: String },
    /// Run every query of the project.
    ///
    /// Items that already have an answer are skipped.
    Run {
        name: String,
        /// Only answer these item keys (repeatable).
        #[arg(long = "include")]
        include: Vec<String>,
        #[arg(long, value_enum, default_value_t = ProgressMode::default_for_tty())]
        progress: ProgressMode,
    },
    /// Answer every query for one random item without storing anything.
    Test {
        name: String,
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Query subcommands.
#[derive(Subcommand)]
enum QueryAction {
    /// Create a query in a project.
    Create {
        project: String,
        name: String,
        #[command(flatten)]
        prompt: PromptSource,
        /// Succeed if an identical query already exists.
        #[arg(long)]
        exists_ok: bool,
    },
    /// Replace a query's prompt. Existing responses are cleared if it changed.
    Update {
        project: String,
        name: String,
        #[command(flatten)]
        prompt: PromptSource,
    },
    /// Delete a query and its responses.
    Delete { project: String, name: String },
    /// List the queries of a project.
    List { project: String },
    /// Show a query and the instruction sent to the model.
    Show { project: String, name: String },
    /// Answer the query for every item of its project.
    Run {
        project: String,
        name: String,
        /// Only answer these item keys (repeatable).
        #[arg(long = "include")]
        include: Vec<String>,
        #[arg(long, value_enum, default_value_t = ProgressMode::default_for_tty())]
        progress: ProgressMode,
    },
    /// Answer the query for one random item.
    Test {
        project: String,
        name: String,
        /// Store the answer if the item has none yet.
        #[arg(long)]
        persist: bool,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print stored responses with their parsed values.
    Responses {
        project: String,
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete all responses of a query.
    Clear { project: String, name: String },
    /// Print keys of items whose parsed answer equals a value.
    Filter {
        project: String,
        name: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            path,
            project,
            collection,
            index,
            include,
        } => {
            let opts = ImportOptions {
                project,
                collection,
                index,
                include_globs: include,
            };
            ingest::run_import(&cfg, &path, &opts).await?;
        }
        Commands::Index { redo, progress } => {
            ingest::run_index(&cfg, redo, progress).await?;
        }
        Commands::Items => {
            get::run_items(&cfg).await?;
        }
        Commands::Get { key } => {
            get::run_get(&cfg, &key).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Project { action } => match action {
            ProjectAction::Create { name, exists_ok } => {
                project_cmd::run_create(&cfg, &name, exists_ok).await?;
            }
            ProjectAction::Delete { name } => {
                project_cmd::run_delete(&cfg, &name).await?;
            }
            ProjectAction::List => {
                project_cmd::run_list(&cfg).await?;
            }
            ProjectAction::Items { name } => {
                project_cmd::run_items(&cfg, &name).await?;
            }
            ProjectAction::AddItems { name, keys } => {
                project_cmd::run_add_items(&cfg, &name, &keys).await?;
            }
            ProjectAction::RemoveItems { name, keys } => {
                project_cmd::run_remove_items(&cfg, &name, &keys).await?;
            }
            ProjectAction::AddCollection { name, collection } => {
                project_cmd::run_add_collection(&cfg, &name, &collection).await?;
            }
            ProjectAction::Run {
                name,
                include,
                progress,
            } => {
                project_cmd::run_run(&cfg, &name, &include, progress).await?;
            }
            ProjectAction::Test { name, seed } => {
                project_cmd::run_test(&cfg, &name, seed).await?;
            }
        },
        Commands::Query { action } => match action {
            QueryAction::Create {
                project,
                name,
                prompt,
                exists_ok,
            } => {
                query_cmd::run_create(&cfg, &project, &name, &prompt, exists_ok).await?;
            }
            QueryAction::Update {
                project,
                name,
                prompt,
            } => {
                query_cmd::run_update(&cfg, &project, &name, &prompt).await?;
            }
            QueryAction::Delete { project, name } => {
                query_cmd::run_delete(&cfg, &project, &name).await?;
            }
            QueryAction::List { project } => {
                query_cmd::run_list(&cfg, &project).await?;
            }
            QueryAction::Show { project, name } => {
                query_cmd::run_show(&cfg, &project, &name).await?;
            }
            QueryAction::Run {
                project,
                name,
                include,
                progress,
            } => {
                query_cmd::run_run(&cfg, &project, &name, &include, progress).await?;
            }
            QueryAction::Test {
                project,
                name,
                persist,
                seed,
            } => {
                query_cmd::run_test(&cfg, &project, &name, persist, seed).await?;
            }
            QueryAction::Responses {
                project,
                name,
                json,
            } => {
                query_cmd::run_responses(&cfg, &project, &name, json).await?;
            }
            QueryAction::Clear { project, name } => {
                query_cmd::run_clear(&cfg, &project, &name).await?;
            }
            QueryAction::Filter {
                project,
                name,
                value,
            } => {
                query_cmd::run_filter(&cfg, &project, &name, &value).await?;
            }
        },
        Commands::Ask {
            prompt,
            project,
            item,
            show_context,
        } => {
            query_cmd::run_ask(
                &cfg,
                &prompt,
                project.as_deref(),
                item.as_deref(),
                show_context,
            )
            .await?;
        }
        Commands::Search {
            phrase,
            project,
            item,
            k,
            json,
        } => {
            search::run_search(&cfg, &phrase, project.as_deref(), item.as_deref(), k, json)
                .await?;
        }
        Commands::Topics {
            project,
            query,
            min_cluster_size,
            seed,
            no_label,
            topic,
            matrix,
            presence,
            by_year,
            exclude,
            json,
        } => {
            let opts = TopicOptions {
                min_cluster_size,
                seed,
                no_label,
                topic,
                matrix,
                presence,
                by_year,
                exclude,
                json,
            };
            topics_cmd::run_topics(&cfg, &project, &query, &opts).await?;
        }
        Commands::Export { project, out } => {
            export::run_export(&cfg, &project, out.as_deref()).await?;
        }
    }

    Ok(())
}
