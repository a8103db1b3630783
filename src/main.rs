use anyhow::{Context, Result};
use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

mod config;
mod error;
mod logging;
mod routes;
mod services;
pub mod models;

use services::{
    derived::DerivedMemos,
    insights::InsightService,
    store::{SnapshotStore, SqliteSnapshotRepository, Subscription},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = config::Config::new()?;

    // Build our application state
    let repository = SqliteSnapshotRepository::open(&config.snapshot_db_path)
        .with_context(|| format!("Failed to open {}", config.snapshot_db_path))?;
    let store = Arc::new(SnapshotStore::open(Box::new(repository)));
    let insights = InsightService::from_config(&config);
    let state = Arc::new(AppState::new(config, store, insights));

    let app = Router::new()
        .merge(routes::routes())
        .layer(DefaultBodyLimit::max(state.config.max_file_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = state.config.bind_addr;
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Application state
pub struct AppState {
    config: config::Config,
    store: Arc<SnapshotStore>,
    memos: Arc<DerivedMemos>,
    insights: Arc<InsightService>,
    _invalidation: Subscription,
}

impl AppState {
    fn new(config: config::Config, store: Arc<SnapshotStore>, insights: InsightService) -> Self {
        let memos = Arc::new(DerivedMemos::default());
        let insights = Arc::new(insights);

        // Derived results are keyed by version; drop stale ones as soon as
        // the snapshot changes.
        let invalidation = {
            let memos = memos.clone();
            let insights = insights.clone();
            store.subscribe(move |snapshot| {
                tracing::debug!(
                    "Snapshot replaced (v{:?}), clearing derived state",
                    snapshot.map(|s| s.version)
                );
                memos.clear();
                insights.invalidate();
            })
        };

        Self {
            config,
            store,
            memos,
            insights,
            _invalidation: invalidation,
        }
    }

    #[cfg(test)]
    fn for_tests(model: Option<Arc<dyn services::insights::InsightModel>>) -> Arc<Self> {
        let store = Arc::new(SnapshotStore::in_memory().expect("in-memory store"));
        Arc::new(Self::new(config::Config::default(), store, InsightService::new(model)))
    }
}
