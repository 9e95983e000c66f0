//! SQLite store: schema, pragma profiles, batched ingestion, and the
//! read-only snapshot interface.

pub mod ingester;
pub mod reader;
pub mod schema;

pub use ingester::Ingester;
