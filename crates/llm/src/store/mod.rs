//! `LlmCallStore` adapters (C4, §6.1): an in-memory implementation for
//! tests and ephemeral runs, and a SQLite-backed one standing in for the
//! spec's document-store adapter (see DESIGN.md for that substitution).

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryLlmCallStore;
pub use sqlite::SqliteLlmCallStore;
