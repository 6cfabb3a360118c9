//! Docket Storage Library
//!
//! This crate provides the object-store abstraction used by Docket: the `Storage`
//! trait, an S3 backend built on `object_store`, a local filesystem backend with
//! HMAC-signed URLs, and an in-process backend for tests.
//!
//! # Storage key format
//!
//! All backends share one key layout:
//!
//! `{env_prefix}tenants/{tenant_id}/{owner_segment/}{unique_name}{.ext}`
//!
//! `env_prefix` is empty in production and `test/` elsewhere. Keys must not contain
//! `..` or a leading `/`. Key derivation lives in the `keys` module so every
//! backend and caller stays consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-memory")]
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use docket_core::StorageBackend;
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
