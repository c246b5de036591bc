//! HTTP surface exposing a [`crate::Connection`] over SPARQL 1.1 Protocol
//! style endpoints, for remote engines and the CLI's `serve` mode.

mod handler;
mod server;

pub use handler::{query_handler, update_handler, AppState};
pub use server::HttpServer;
