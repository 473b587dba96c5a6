pub mod api;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod mcp;
pub mod search;
pub mod source;
