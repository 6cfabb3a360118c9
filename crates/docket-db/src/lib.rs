//! Docket persistence
//!
//! Repositories for document collections and quota accounts, with PostgreSQL
//! implementations (sqlx) and in-memory implementations for tests and local
//! development.

pub mod db;

pub use db::*;
