use std::path::PathBuf;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::graph::RelatedOptions;
use crate::jobs::StartStatus;
use crate::search::SearchOptions;
use crate::server::AppState;

/// Envelope of every API response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn ok<T: Serialize>(data: T, message: Option<String>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse {
        success: true,
        message,
        data: Some(data),
    })
}

fn failure(e: AppError) -> HttpResponse {
    let status = match &e {
        AppError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
        AppError::AmbiguousProject(_) => StatusCode::BAD_REQUEST,
        AppError::IndexingDisabled(_) | AppError::RootMissing(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("request failed: {e}");
    }
    HttpResponse::build(status).json(ApiResponse::<()> {
        success: false,
        message: Some(e.to_string()),
        data: None,
    })
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub project: Option<String>,
    pub limit: Option<usize>,
    pub min_score: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl SearchRequest {
    fn options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.limit,
            min_score: self.min_score,
            max_tokens: self.max_tokens,
        }
    }
}

pub async fn search_knowledge(
    state: web::Data<AppState>,
    body: web::Json<SearchRequest>,
) -> impl Responder {
    match state
        .orchestrator
        .search_knowledge(&body.query, body.project.as_deref(), body.options())
        .await
    {
        Ok(response) => ok(response, None),
        Err(e) => failure(e),
    }
}

pub async fn search_code(
    state: web::Data<AppState>,
    body: web::Json<SearchRequest>,
) -> impl Responder {
    match state
        .orchestrator
        .search_code(&body.query, body.project.as_deref(), body.options())
        .await
    {
        Ok(response) => ok(response, None),
        Err(e) => failure(e),
    }
}

fn default_true() -> bool {
    true
}

fn default_depth() -> usize {
    1
}

#[derive(Debug, Deserialize)]
pub struct RelatedRequest {
    pub file: PathBuf,
    pub project: Option<String>,
    #[serde(default = "default_true")]
    pub include_imports: bool,
    #[serde(default = "default_true")]
    pub include_imported_by: bool,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

pub async fn related(
    state: web::Data<AppState>,
    body: web::Json<RelatedRequest>,
) -> impl Responder {
    let orchestrator = &state.orchestrator;
    let project = match orchestrator.registry().resolve(body.project.as_deref()) {
        Ok(p) => p.name.clone(),
        Err(e) => return failure(e),
    };
    let options = RelatedOptions {
        include_imports: body.include_imports,
        include_imported_by: body.include_imported_by,
        depth: body.depth,
    };
    match orchestrator.find_related_files(&body.file, &project, options).await {
        Ok(files) => ok(files, None),
        Err(e) => failure(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub project: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub clean: bool,
}

pub async fn start_indexing(
    state: web::Data<AppState>,
    body: web::Json<IndexRequest>,
) -> impl Responder {
    let orchestrator = &state.orchestrator;
    let project = match orchestrator.registry().resolve(body.project.as_deref()) {
        Ok(p) => p.name.clone(),
        Err(e) => return failure(e),
    };
    match orchestrator.run_indexing(&project, body.force, body.clean).await {
        Ok(outcome) => {
            let message = match outcome.status {
                StartStatus::Started => format!("indexing started for {project}"),
                StartStatus::AlreadyRunning => format!("indexing already running for {project}"),
            };
            ok(outcome, Some(message))
        }
        Err(e) => failure(e),
    }
}

pub async fn index_status(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match state.orchestrator.index_status(&path).await {
        Ok(status) => ok(status, None),
        Err(e) => failure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use actix_web::{App, test};
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use crate::config::AppConfig;
    use crate::embed::testing::hashing_cache;
    use crate::indexer::deletions::DeletedPathsFile;
    use crate::indexer::parser::TreeSitterContext;
    use crate::registry::ProjectRegistry;
    use crate::search::Orchestrator;

    fn state(dir: &TempDir) -> AppState {
        let config = AppConfig::default();
        let registry = ProjectRegistry::from_config(&config, dir.path());
        AppState {
            orchestrator: Arc::new(Orchestrator::new(
                config,
                registry,
                hashing_cache(),
                Arc::new(TreeSitterContext),
                Arc::new(DeletedPathsFile),
            )),
        }
    }

    #[actix_web::test]
    async fn unknown_project_is_a_404_envelope() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&dir)))
                .route("/search/knowledge", web::post().to(search_knowledge))
                .route("/index/{project}", web::get().to(index_status)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/search/knowledge")
            .set_json(json!({"query": "anything", "project": "nope"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("nope"));
        assert!(body.get("data").is_none());

        let req = test::TestRequest::get().uri("/index/nope").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn index_then_search_through_the_api() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("guide.md"),
            "Deployments roll out through the canary stage before production.",
        )
        .unwrap();
        let state = state(&dir);
        let orchestrator = Arc::clone(&state.orchestrator);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/index", web::post().to(start_indexing))
                .route("/search/knowledge", web::post().to(search_knowledge)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/index")
            .set_json(json!({}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "started");

        let project = orchestrator.registry().all()[0].name.clone();
        orchestrator.scheduler().wait(&project).await;

        let req = test::TestRequest::post()
            .uri("/search/knowledge")
            .set_json(json!({"query": "canary deployments", "max_tokens": 1000}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["mode"], "semantic");
        assert_eq!(body["data"]["hits"][0]["file"], "guide.md");
        assert_eq!(body["data"]["freshness"][0]["indexing_in_progress"], false);
    }
}
