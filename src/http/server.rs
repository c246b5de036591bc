//! Axum HTTP server exposing a [`crate::Connection`] as a SPARQL endpoint.

use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::handler::{query_handler, update_handler, AppState};
use crate::Connection;

/// Serves `POST /sparql/query` and `POST /sparql/update` over one opened
/// [`Connection`], shared read-many/write-one just like in-process use.
pub struct HttpServer {
    state: AppState,
    port: u16,
}

impl HttpServer {
    pub fn new(connection: Arc<Connection>, port: u16) -> Self {
        Self { state: connection, port }
    }

    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let app = Router::new()
            .route("/sparql/query", post(query_handler))
            .route("/sparql/update", post(update_handler))
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state));

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("SPARQL endpoint listening on http://{}", addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
