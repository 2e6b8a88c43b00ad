//! Web layer module
//!
//! HTTP interface for the neuromap service. Handlers stay thin and
//! delegate to the services carried in [`AppState`]; responses use the
//! `{"data": ...}` envelope throughout.

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{
    cache::ResponseCache, config::Config, database::Database, images::ImageStore,
    locations::LocationService, tasks::TaskService,
};

pub mod extractors;
pub mod handlers;
pub mod responses;

// Re-export commonly used types
pub use extractors::{PaginationParams, RequestContext};
pub use responses::PaginatedResponse;

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(
        config: Config,
        database: Database,
        cache: ResponseCache,
        locations: LocationService,
        tasks: TaskService,
        store: ImageStore,
    ) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;

        let app = build_router(AppState {
            config,
            database,
            cache,
            locations,
            tasks,
            store,
        });

        Ok(Self { app, addr })
    }

    /// Start the web server
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }

    /// Get the host address
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Build the router with all routes and middleware. Public so tests can
/// drive the router without binding a socket.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(handlers::health::health_check))
        // Location API
        .route("/api/locations/", get(handlers::locations::get_location))
        .route("/api/locations/:val/", get(handlers::locations::location_summary))
        .route(
            "/api/locations/:val/studies/",
            get(handlers::locations::get_studies),
        )
        .route(
            "/api/locations/:val/images",
            get(handlers::locations::get_images),
        )
        .route(
            "/api/locations/:val/compare/",
            get(handlers::locations::compare_location),
        )
        // Derived image downloads
        .route("/api/images/:id/download", get(handlers::images::download))
        // Study and feature listings
        .route("/api/studies/", get(handlers::studies::list_studies))
        .route("/api/studies/:pmid", get(handlers::studies::get_study))
        .route("/api/features/", get(handlers::features::list_features))
        // Gene endpoints
        .route("/genes/:symbol/decode", get(handlers::genes::decode))
        .route("/genes/:symbol/image", get(handlers::genes::image))
        .route("/genes/:symbol/scatter/:file", get(handlers::genes::scatter))
        // Middleware (applied in reverse order)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        // Shared state
        .with_state(state)
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub database: Database,
    pub cache: ResponseCache,
    pub locations: LocationService,
    pub tasks: TaskService,
    pub store: ImageStore,
}
