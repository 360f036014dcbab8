//! Database layer for the dropout forecasting service.
//!
//! Provides SQLite storage with schema migrations, natural-key upserts used
//! by the pipeline, and the filtered, paginated read queries behind the API.

pub mod models;
pub mod pool;
pub mod queries;
pub mod store;

pub use pool::DbPool;
