mod cli;
mod config;
mod embed;
mod error;
mod graph;
mod index;
mod indexer;
mod jobs;
mod registry;
mod search;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, FindArgs, OutputFormat, RelatedArgs};
use graph::RelatedOptions;
use jobs::{JobState, StartStatus};
use registry::ProjectRegistry;
use search::{Orchestrator, SearchOptions, SearchResponse};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    fmt().with_env_filter(EnvFilter::new(filter)).init();

    // 1. Resolve target directory
    let target_dir = match cli.target_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot read current directory")?,
    };

    // 2. Resolve global config path (overridable via --config)
    let global_cfg_path = cli.config.unwrap_or_else(config::global_config_path);

    // 3. Auto-create global config on first launch
    config::ensure_global_config(&global_cfg_path)?;

    // 4. Probe for project config in target dir (optional, never auto-created)
    let project_cfg_path = target_dir.join("vizier.toml");
    let project_cfg = project_cfg_path.exists().then_some(project_cfg_path.as_path());

    // 5. Load layered config
    let cfg = config::load(&global_cfg_path, project_cfg)?;

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    // 6. Build the orchestrator over the registered projects
    let registry = ProjectRegistry::from_config(&cfg, &target_dir);
    let server_cfg = cfg.server.clone();
    let orchestrator = Arc::new(Orchestrator::with_defaults(cfg, registry));

    match cli.command {
        Commands::Index(args) => {
            let project = orchestrator
                .registry()
                .resolve(args.project.as_deref())?
                .name
                .clone();
            let outcome = orchestrator.run_indexing(&project, args.force, args.clean).await?;
            if outcome.status == StartStatus::AlreadyRunning {
                println!("Indexing of {project} is already running.");
            }
            orchestrator.scheduler().wait(&project).await;

            let status = orchestrator.index_status(&project).await?;
            match status.progress.state {
                JobState::Complete => println!(
                    "Done. {} files processed: {} knowledge chunks in {} files, {} code chunks in {} files.",
                    status.progress.items_done,
                    status.knowledge.total_chunks,
                    status.knowledge.total_files,
                    status.code.total_chunks,
                    status.code.total_files,
                ),
                _ => anyhow::bail!(
                    "indexing {project} failed: {}",
                    status.progress.last_error.unwrap_or_default()
                ),
            }
            orchestrator.shutdown().await;
        }
        Commands::Find(args) => find_cmd(&orchestrator, args).await?,
        Commands::Related(args) => related_cmd(&orchestrator, args).await?,
        Commands::Status(args) => {
            for project in orchestrator.registry().scope(args.project.as_deref())? {
                let status = orchestrator.index_status(&project.name).await?;
                println!("{}  ({})", status.project, project.root.display());
                if !status.semantic_search {
                    println!("  semantic search : disabled");
                }
                println!("  state           : {:?}", status.progress.state);
                if let Some(total) = status.progress.items_total {
                    println!("  progress        : {}/{total}", status.progress.items_done);
                }
                if let Some(err) = &status.progress.last_error {
                    println!("  last error      : {err}");
                }
                println!(
                    "  knowledge       : {} chunks, {} files",
                    status.knowledge.total_chunks, status.knowledge.total_files
                );
                println!(
                    "  code            : {} chunks, {} files",
                    status.code.total_chunks, status.code.total_files
                );
                match status.freshness.index_age_seconds {
                    Some(age) => println!("  last indexed    : {age}s ago"),
                    None => println!("  last indexed    : never"),
                }
            }
        }
        Commands::Serve(args) => {
            server::run_server(args, server_cfg, Arc::clone(&orchestrator)).await?;
        }
        // Printed before the orchestrator is built
        Commands::Config => {}
    }

    Ok(())
}

async fn find_cmd(orchestrator: &Orchestrator, args: FindArgs) -> Result<()> {
    let options = SearchOptions {
        limit: args.limit,
        min_score: args.min_score,
        max_tokens: args.max_tokens,
    };
    let project = args.project.as_deref();
    let response = if args.code {
        orchestrator.search_code(&args.query, project, options).await?
    } else {
        orchestrator.search_knowledge(&args.query, project, options).await?
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text => print_search(&response),
    }
    Ok(())
}

fn print_search(response: &SearchResponse) {
    for fresh in &response.freshness {
        if let Some(advisory) = &fresh.advisory {
            println!("[{advisory}]");
        } else if fresh.last_indexed_at.is_none() {
            println!("[{} has not been indexed yet]", fresh.project);
        }
    }

    if response.hits.is_empty() && response.literal_matches.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, hit) in response.hits.iter().enumerate() {
        let location = match &hit.code {
            Some(span) => {
                let context = span
                    .enclosing_context
                    .as_deref()
                    .map(|c| format!("  {c}"))
                    .unwrap_or_default();
                format!("{}:{}-{}{context}", hit.file.display(), span.line_start, span.line_end)
            }
            None => hit.file.display().to_string(),
        };
        println!("[{}] score:{:.4}  {}  ({})", i + 1, hit.score, location, hit.project);
        // First 3 lines of content as preview
        let preview: String = hit
            .content
            .lines()
            .take(3)
            .map(|l| format!("  {l}"))
            .collect::<Vec<_>>()
            .join("\n");
        println!("{preview}");
        println!();
    }

    for m in &response.literal_matches {
        println!("{}:{}  {}", m.file.display(), m.line, m.text);
    }

    if response.truncated {
        println!("[results truncated at {} tokens]", response.total_tokens);
    }
}

async fn related_cmd(orchestrator: &Orchestrator, args: RelatedArgs) -> Result<()> {
    let project = orchestrator
        .registry()
        .resolve(args.project.as_deref())?
        .name
        .clone();
    let options = RelatedOptions {
        include_imports: !args.no_imports,
        include_imported_by: !args.no_imported_by,
        depth: args.depth,
    };
    let related = orchestrator
        .find_related_files(&args.file, &project, options)
        .await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&related)?),
        OutputFormat::Text if related.is_empty() => println!("No related files found."),
        OutputFormat::Text => {
            for r in &related {
                println!(
                    "{:<12} {}  (via {:?}, depth {})",
                    format!("{:?}", r.relationship),
                    r.file.display(),
                    r.import_path,
                    r.depth
                );
            }
        }
    }
    Ok(())
}
