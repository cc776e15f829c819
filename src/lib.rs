//! Local-first home inventory ledger for insurance documentation.
//!
//! Properties contain rooms, rooms contain containers and items, items carry
//! photos, receipts, tags and a category. The graph is persisted in SQLite,
//! versioned through an explicit migration registry, scored for insurance
//! readiness, and portable through structured backups.

pub mod config;
pub mod db;
mod error;
pub mod export;
pub mod graph;
pub mod id;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod restore;
pub mod scoring;
pub mod store;
pub mod time;
pub mod validation;

pub use error::{AppError, AppResult};
