//! Database module: rows, schema and the actor that owns the SQLite pool.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `traits.rs`: the narrow store contracts the Gmail subsystem depends on

pub mod actor;
pub mod models;
pub mod schema;
pub mod traits;

pub use models::{DbGmailCredential, DbGmailWatch};
pub use schema::SQLITE_INIT;
pub use traits::{CredentialStore, WatchStore};

pub use actor::{DbActorHandle, spawn};
