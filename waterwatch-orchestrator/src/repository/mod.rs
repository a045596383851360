//! Repository Module
//!
//! Data access layer for the PostgreSQL storage collaborator.

pub mod audit;
pub mod record;

pub use audit as audit_repository;
pub use record as record_repository;
