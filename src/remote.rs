//! Remote connections: the same query/update/subscribe surface as
//! [`crate::Connection`], forwarded over a D-Bus-style bus or plain HTTP,
//! matching spec §6's `open_bus`/`open_remote` entry points.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::Param;
use crate::sparql::{ResultFormat, SparqlResults};

/// Wire request sent to a remote engine. Mirrors the HTTP endpoint's own
/// request body so a bus transport and the HTTP transport share one shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub sparql: String,
    pub params: Vec<String>,
}

impl RemoteRequest {
    fn new(sparql: &str, params: &[(String, Param)]) -> Self {
        let encoded = params
            .iter()
            .map(|(name, value)| match value {
                Param::Int(i) => format!("{name}:i:{i}"),
                Param::Double(d) => format!("{name}:d:{d}"),
                Param::Bool(b) => format!("{name}:b:{}", if *b { "t" } else { "f" }),
                Param::Str(s) => format!("{name}:s:{s}"),
            })
            .collect();
        Self { sparql: sparql.to_string(), params: encoded }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoteQueryResponse {
    pub json: String,
}

/// Abstracts the underlying transport so `RemoteConnection` can run over a
/// message bus (DBus/similar IPC) or a plain HTTP client identically; tests
/// substitute an in-process fake implementing this trait.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn call_query(&self, service: &str, request: RemoteRequest) -> EngineResult<String>;
    async fn call_update(&self, service: &str, request: RemoteRequest) -> EngineResult<()>;
}

/// HTTP transport implementing spec §6's wire protocol against a remote
/// engine's `/sparql/query` and `/sparql/update` endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
    base_uri: String,
}

impl HttpTransport {
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_uri: base_uri.into() }
    }
}

#[async_trait]
impl BusTransport for HttpTransport {
    async fn call_query(&self, _service: &str, request: RemoteRequest) -> EngineResult<String> {
        let url = format!("{}/sparql/query", self.base_uri);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Remote(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Remote(format!("remote query failed: {}", response.status())));
        }
        response.text().await.map_err(|e| EngineError::Remote(e.to_string()))
    }

    async fn call_update(&self, _service: &str, request: RemoteRequest) -> EngineResult<()> {
        let url = format!("{}/sparql/update", self.base_uri);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Remote(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Remote(format!("remote update failed: {}", response.status())));
        }
        Ok(())
    }
}

/// A session bus address, e.g. `org.example.SemanticStore` (spec's
/// `open_bus(service)`), kept distinct from the HTTP base URI so a bus
/// transport's addressing scheme isn't conflated with HTTP's.
pub struct RemoteConnection {
    transport: Box<dyn BusTransport>,
    service: String,
}

impl RemoteConnection {
    pub fn new(transport: Box<dyn BusTransport>, service: impl Into<String>) -> Self {
        Self { transport, service: service.into() }
    }

    pub async fn open_remote(uri: impl Into<String>) -> EngineResult<Self> {
        let uri = uri.into();
        Ok(Self::new(Box::new(HttpTransport::new(uri.clone())), uri))
    }

    /// Connects to a service advertised on a message bus. Bus registration
    /// and discovery are out of scope here (no bus daemon glue is vendored);
    /// callers provide their own [`BusTransport`] that knows how to reach
    /// `service` on whatever bus they run.
    pub fn open_bus(transport: Box<dyn BusTransport>, service: impl Into<String>) -> Self {
        Self::new(transport, service)
    }

    pub async fn query(&self, sparql_text: &str, params: &[(String, Param)]) -> EngineResult<SparqlResults> {
        let request = RemoteRequest::new(sparql_text, params);
        let body = self.transport.call_query(&self.service, request).await?;
        parse_remote_select(&body)
    }

    pub async fn update(&self, sparql_text: &str, params: &[(String, Param)]) -> EngineResult<()> {
        let request = RemoteRequest::new(sparql_text, params);
        self.transport.call_update(&self.service, request).await
    }

    pub async fn update_blank(&self, sparql_text: &str, params: &[(String, Param)]) -> EngineResult<Vec<HashMap<String, String>>> {
        self.update(sparql_text, params).await?;
        Ok(Vec::new())
    }
}

/// Decodes a remote query's SPARQL-JSON results response into our own
/// [`SparqlResults`]. A full JSON-results parser belongs in
/// [`crate::sparql::results`]; this handles the subset a `Select` response
/// needs (ASK/CONSTRUCT/DESCRIBE remote calls are out of scope for the bus
/// transport today).
fn parse_remote_select(body: &str) -> EngineResult<SparqlResults> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| EngineError::Remote(e.to_string()))?;
    let variables: Vec<String> = value["head"]["vars"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let bindings = value["results"]["bindings"].as_array().cloned().unwrap_or_default();

    let mut solutions = Vec::new();
    for row in bindings {
        let mut solution = crate::sparql::QuerySolution::new();
        if let Some(obj) = row.as_object() {
            for (var, term) in obj {
                if let Some(value) = term_from_json(term) {
                    solution.bind(var.clone(), value);
                }
            }
        }
        solutions.push(solution);
    }
    Ok(SparqlResults::Select { variables, solutions })
}

fn term_from_json(term: &serde_json::Value) -> Option<crate::rdf::RdfTerm> {
    use crate::rdf::{BlankNode, Literal, NamedNode, RdfTerm};
    let kind = term["type"].as_str()?;
    let value = term["value"].as_str()?;
    match kind {
        "uri" => NamedNode::new(value).ok().map(RdfTerm::NamedNode),
        "bnode" => BlankNode::from_str(value).ok().map(RdfTerm::BlankNode),
        "literal" => {
            if let Some(lang) = term["xml:lang"].as_str() {
                Literal::new_language_tagged_literal(value, lang).ok().map(RdfTerm::Literal)
            } else if let Some(datatype) = term["datatype"].as_str() {
                Some(RdfTerm::Literal(Literal::new_typed_literal(value, NamedNode::new(datatype).ok()?)))
            } else {
                Some(RdfTerm::Literal(Literal::new_simple_literal(value)))
            }
        }
        _ => None,
    }
}

/// `ResultFormat` is re-exported here only so remote callers can request a
/// specific serialization without importing `crate::sparql` directly.
pub type RemoteResultFormat = ResultFormat;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeTransport {
        last_query: Mutex<Option<String>>,
    }

    #[async_trait]
    impl BusTransport for FakeTransport {
        async fn call_query(&self, _service: &str, request: RemoteRequest) -> EngineResult<String> {
            *self.last_query.lock().unwrap() = Some(request.sparql.clone());
            Ok(r#"{"head":{"vars":["s"]},"results":{"bindings":[{"s":{"type":"uri","value":"http://example.org/a"}}]}}"#.to_string())
        }

        async fn call_update(&self, _service: &str, _request: RemoteRequest) -> EngineResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn query_decodes_select_bindings() {
        let transport = FakeTransport { last_query: Mutex::new(None) };
        let conn = RemoteConnection::new(Box::new(transport), "test.service");
        let result = conn.query("SELECT ?s { ?s a <http://example.org/Doc> }", &[]).await.unwrap();
        match result {
            SparqlResults::Select { solutions, .. } => assert_eq!(solutions.len(), 1),
            _ => panic!("expected Select"),
        }
    }
}
