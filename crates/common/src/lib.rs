//! Shared types and error definitions used across all claude-skills crates.

pub mod audit;
pub mod error;
pub mod types;

pub use {
    audit::{AuditEntry, AuditLog},
    error::{Context, Error, Result},
    types::{ContentType, Scope},
};
