// Aidbox MCP Server - Library root

pub mod auth;
pub mod config;
pub mod converters;
pub mod error;
pub mod fhir_client;
pub mod http_client;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod tools;
pub mod transport;
