//! Durable storage: content-addressed artifacts and sqlite-backed records.

pub mod content;
pub mod jobs;
pub mod sqlite;

pub use content::{normalize_hash, sha256_file, sha256_hex, ContentStore};
pub use jobs::JobStore;
pub use sqlite::run_blocking;
