//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, MemoryAdapter},
    config::{Config, StoreBackend},
    error::ApiError,
    web::{
        build_router,
        rest::ApiDoc,
        state::{spawn_idle_sweeper, AppState},
    },
};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE, COOKIE},
        HeaderValue, Method,
    },
    Router,
};
use reader_core::domain::{Book, Chapter};
use reader_core::ports::DatabaseService;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to the Store ---
    let db: Arc<dyn DatabaseService> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| ApiError::Internal("DATABASE_URL is required".to_string()))?;
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; all purchases and bookmarks are lost on restart");
            let memory = MemoryAdapter::new();
            let sample = sample_book()?;
            info!(book_id = %sample.id(), "Seeded sample book for preview reading");
            memory.insert_book(sample).await;
            Arc::new(memory)
        }
    };

    // --- 3. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(db, config.clone()));
    spawn_idle_sweeper(app_state.clone());

    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, ACCEPT, COOKIE]);

    // --- 4. Create the Web Router ---
    let api_router = build_router(app_state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn sample_book() -> Result<Book, ApiError> {
    Book::new(
        Uuid::new_v4(),
        "A Sample Book".to_string(),
        60,
        vec![
            Chapter::new("Opening", 1),
            Chapter::new("The Middle", 21),
            Chapter::new("Ending", 51),
        ],
    )
    .map_err(|e| ApiError::Internal(e.to_string()))
}
