use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// vizier: semantic search and dependency lookup for coding agents
#[derive(Parser, Debug)]
#[command(
    name = "vz",
    version,
    about = "Index a codebase and answer \"what is relevant to X\" under a token budget",
    long_about = None
)]
pub struct Cli {
    /// Path to a TOML configuration file
    /// (default: ~/.vizier/vizier.toml)
    #[arg(short, long, global = true, env = "VIZIER_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Target project directory (default: current working directory)
    #[arg(short = 'D', long = "dir", global = true, value_name = "DIR")]
    pub target_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a project into its knowledge and code indexes
    Index(IndexArgs),

    /// Search indexed knowledge (or code with --code)
    Find(FindArgs),

    /// List files related to a file through imports
    Related(RelatedArgs),

    /// Show indexing progress and index statistics
    Status(StatusArgs),

    /// Run the HTTP API and re-index on file changes
    Serve(ServeArgs),

    /// Print the resolved configuration as JSON and exit
    Config,
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Project name (default: the only configured project)
    #[arg(short, long)]
    pub project: Option<String>,

    /// Re-embed files even when their mtime is unchanged
    #[arg(long)]
    pub force: bool,

    /// Delete both indexes before indexing
    #[arg(long)]
    pub clean: bool,
}

#[derive(Args, Debug)]
pub struct FindArgs {
    /// Natural language query to search for
    pub query: String,

    /// Search the code index instead of the knowledge index
    #[arg(long)]
    pub code: bool,

    /// Restrict the search to one project (default: all projects)
    #[arg(short, long)]
    pub project: Option<String>,

    /// Maximum number of results to show
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Drop results scoring below this cosine similarity
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Stop adding results once this many tokens are used
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct RelatedArgs {
    /// File to start from, absolute or relative to the project root
    pub file: PathBuf,

    /// Project name (default: the only configured project)
    #[arg(short, long)]
    pub project: Option<String>,

    /// Do not follow the file's own imports
    #[arg(long)]
    pub no_imports: bool,

    /// Do not follow files importing this one
    #[arg(long)]
    pub no_imported_by: bool,

    /// How many import hops to follow
    #[arg(short, long, default_value_t = 1)]
    pub depth: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Project name (default: every project)
    #[arg(short, long)]
    pub project: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (default: server.host from config)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (default: server.port from config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Do not watch project roots for changes
    #[arg(long)]
    pub no_watch: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
