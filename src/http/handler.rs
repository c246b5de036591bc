//! SPARQL query/update handlers.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::rdf::{RdfFormat, RdfSerializer};
use crate::sparql::{ResultFormat, SparqlResults};
use crate::{Connection, Param};

pub type AppState = Arc<Connection>;

#[derive(Deserialize)]
pub struct SparqlRequest {
    pub sparql: String,
    #[serde(default)]
    pub params: Vec<String>,
}

fn decode_params(wire: &[String]) -> Vec<(String, Param)> {
    wire.iter().filter_map(|entry| Param::parse_wire(entry)).collect()
}

/// `POST /sparql/query` — runs a SELECT/ASK/CONSTRUCT/DESCRIBE query.
/// SELECT/ASK answers come back as SPARQL-JSON; CONSTRUCT/DESCRIBE as Turtle.
pub async fn query_handler(
    State(conn): State<AppState>,
    Json(request): Json<SparqlRequest>,
) -> impl IntoResponse {
    let params = decode_params(&request.params);
    match conn.query_raw(&request.sparql, &params).await {
        Ok(results @ (SparqlResults::Select { .. } | SparqlResults::Ask(_))) => {
            match results.serialize(ResultFormat::Json) {
                Ok(body) => (axum::http::StatusCode::OK, body).into_response(),
                Err(e) => error_response(&e),
            }
        }
        Ok(SparqlResults::Construct(triples)) | Ok(SparqlResults::Describe(triples)) => {
            match RdfSerializer::serialize(&triples, RdfFormat::Turtle) {
                Ok(body) => (axum::http::StatusCode::OK, body).into_response(),
                Err(e) => error_response(&e.to_string()),
            }
        }
        Err(e) => error_response(&e.to_string()),
    }
}

#[derive(Serialize)]
struct UpdateResponse {
    bindings: Vec<std::collections::HashMap<String, String>>,
}

/// `POST /sparql/update` — runs an INSERT/DELETE/CLEAR update, returning the
/// blank-node bindings minted by any DELETE/INSERT WHERE clause.
pub async fn update_handler(
    State(conn): State<AppState>,
    Json(request): Json<SparqlRequest>,
) -> impl IntoResponse {
    let params = decode_params(&request.params);
    match conn.update_blank(&request.sparql, &params).await {
        Ok(bindings) => Json(UpdateResponse { bindings }).into_response(),
        Err(e) => error_response(&e.to_string()),
    }
}

fn error_response(message: &str) -> axum::response::Response {
    (axum::http::StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}
