//! Database module: row models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by repositories that have no domain counterpart.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers normally go through the capability traits in `crate::store`; the
//! outbox worker and operator binaries use the repository functions directly.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{OutboxTask, StatusUpdate};
