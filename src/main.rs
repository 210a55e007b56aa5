mod access;
mod backend;
mod config;
mod db;
mod editor;
mod error;
mod model;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use backend::memory::{MemoryBackend, MemoryObjectStore};
use backend::postgres::PgBackend;
use backend::storage::{FsObjectStore, HttpObjectStore};
use backend::{DocumentStore, IdentityProvider, ObjectStore, ShareStore};
use config::{AppConfig, StorageConfig};
use state::{AppState, Backends};

fn object_store(storage: &StorageConfig) -> Result<Arc<dyn ObjectStore>, backend::StorageError> {
    Ok(match storage {
        StorageConfig::Fs { root } => {
            tracing::info!(root = %root.display(), "filesystem object storage");
            Arc::new(FsObjectStore::new(root.clone()))
        }
        StorageConfig::Http { base_url, bucket, api_key } => {
            tracing::info!(%base_url, %bucket, "http object storage");
            Arc::new(HttpObjectStore::new(base_url, bucket, api_key.clone())?)
        }
        StorageConfig::Memory => {
            tracing::warn!("in-memory object storage; attachments are lost on restart");
            Arc::new(MemoryObjectStore::new())
        }
    })
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().expect("invalid configuration");
    let objects = object_store(&config.storage).expect("object storage init failed");

    let backends = if let Some(database_url) = &config.database_url {
        let pool = db::init_pool(database_url, config.db_max_connections)
            .await
            .expect("database init failed");
        let pg = Arc::new(PgBackend::new(pool));
        Backends {
            documents: pg.clone() as Arc<dyn DocumentStore>,
            shares: pg.clone() as Arc<dyn ShareStore>,
            identity: pg as Arc<dyn IdentityProvider>,
            objects,
        }
    } else {
        tracing::warn!("DATABASE_URL not set; using in-memory backend");
        let memory = Arc::new(MemoryBackend::new());
        if let Some(email) = &config.dev_user_email {
            let account = memory.seed_account(email, email).await;
            let token = memory.issue_token(account.id).await;
            tracing::info!(%email, %token, "seeded dev account");
        }
        Backends {
            documents: memory.clone() as Arc<dyn DocumentStore>,
            shares: memory.clone() as Arc<dyn ShareStore>,
            identity: memory as Arc<dyn IdentityProvider>,
            objects,
        }
    };

    let state = AppState::new(backends, config.sync);
    let app = routes::app(state, config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "drawpad listening");
    axum::serve(listener, app).await.expect("server failed");
}
