//! Waterwatch Core
//!
//! Core types and abstractions shared by the Waterwatch services.
//!
//! This crate contains:
//! - Domain types: jobs, data sources, loop health, change events
//! - Change detection: record fingerprints and field-level diffs
//! - DTOs: request/response types and the live notification protocol

pub mod change;
pub mod domain;
pub mod dto;
