//! Local SQLite storage: credentials and the persisted job log.
//!
//! - `model`: row shapes read back by the repository.
//! - `repo`: SQL-only functions.
//!
//! Callers import from `imagen_batch::db`; the repository API is re-exported.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::JobRow;
