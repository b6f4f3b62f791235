pub mod handlers;
pub mod watcher;

use std::sync::Arc;

use actix_web::{App, HttpServer, web};

use crate::cli::ServeArgs;
use crate::config::ServerConfig;
use crate::search::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub async fn run_server(
    args: ServeArgs,
    server: ServerConfig,
    orchestrator: Arc<Orchestrator>,
) -> anyhow::Result<()> {
    let host = args.host.unwrap_or(server.host);
    let port = args.port.unwrap_or(server.port);
    let bind_addr = format!("{host}:{port}");
    tracing::info!("Starting server on {bind_addr}");

    let _watcher = if server.watch && !args.no_watch {
        Some(watcher::spawn_watcher(Arc::clone(&orchestrator))?)
    } else {
        None
    };

    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
    };

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/search/knowledge", web::post().to(handlers::search_knowledge))
            .route("/search/code", web::post().to(handlers::search_code))
            .route("/related", web::post().to(handlers::related))
            .route("/index", web::post().to(handlers::start_indexing))
            .route("/index/{project}", web::get().to(handlers::index_status))
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    orchestrator.shutdown().await;
    Ok(())
}
