use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::jobs::StartStatus;
use crate::registry::ProjectRegistry;
use crate::search::Orchestrator;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Watch every semantic-search project root and start an incremental indexing
/// job after each burst of changes. The returned `RecommendedWatcher` must be
/// kept alive for as long as watching is needed.
pub fn spawn_watcher(orchestrator: Arc<Orchestrator>) -> anyhow::Result<RecommendedWatcher> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Event>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            match event.kind {
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                    let _ = event_tx.send(event);
                }
                _ => {}
            }
        }
    })?;

    for project in orchestrator.registry().all() {
        if project.semantic_search && project.root.is_dir() {
            watcher.watch(&project.root, RecursiveMode::Recursive)?;
            tracing::info!("watching {} for changes", project.root.display());
        }
    }

    tokio::spawn(async move {
        let pending = Arc::new(Mutex::new(HashSet::new()));
        loop {
            // Wait for the first event of a burst
            let Some(first) = event_rx.recv().await else {
                break;
            };
            let mut events = vec![first];

            // Debounce: let the burst settle before triggering a refresh
            tokio::time::sleep(DEBOUNCE_WINDOW).await;
            while let Ok(event) = event_rx.try_recv() {
                events.push(event);
            }

            for project in affected_projects(orchestrator.registry(), &events) {
                trigger(&orchestrator, &pending, project).await;
            }
        }
    });

    Ok(watcher)
}

/// Start incremental indexing for `project`. Changes seen while a job is
/// already running are picked up by one follow-up run after it ends.
async fn trigger(orchestrator: &Arc<Orchestrator>, pending: &Arc<Mutex<HashSet<String>>>, project: String) {
    match orchestrator.run_indexing(&project, false, false).await {
        Ok(outcome) if outcome.status == StartStatus::Started => {
            tracing::info!("file change detected, re-indexing {project}")
        }
        Ok(_) => {
            let first = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(project.clone());
            if !first {
                return;
            }
            tracing::debug!("{project}: indexing already running, queued a follow-up");
            let (orchestrator, pending) = (Arc::clone(orchestrator), Arc::clone(pending));
            tokio::spawn(async move {
                while orchestrator.scheduler().is_running(&project) {
                    tokio::time::sleep(DEBOUNCE_WINDOW).await;
                }
                pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&project);
                if let Err(e) = orchestrator.run_indexing(&project, false, false).await {
                    tracing::error!("follow-up re-index of {project} failed: {e}");
                }
            });
        }
        Err(e) => tracing::error!("background re-index of {project} failed: {e}"),
    }
}

/// Names of the projects owning any path in `events`, ignoring changes under
/// a project's own data directory.
fn affected_projects(registry: &ProjectRegistry, events: &[notify::Event]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for path in events.iter().flat_map(|e| e.paths.iter()) {
        let Some(project) = registry.containing(path) else {
            continue;
        };
        if path.starts_with(&project.data_dir) || !project.semantic_search {
            continue;
        }
        if seen.insert(project.name.clone()) {
            names.push(project.name.clone());
        }
    }
    names
}
