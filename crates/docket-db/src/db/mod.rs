//! Database repositories for data access layer
//!
//! Each repository is a trait with a PostgreSQL implementation and an
//! in-memory implementation. Services depend on the traits only.

pub mod documents;
pub mod memory;
pub mod quota;
pub mod setup;

pub use documents::{DocumentRepository, PgDocumentRepository};
pub use memory::{MemoryDocumentRepository, MemoryQuotaRepository};
pub use quota::{PgQuotaRepository, QuotaRepository};
pub use setup::{connect, connect_and_migrate, run_migrations};
