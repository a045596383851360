//! Core domain types
//!
//! This module contains the core domain structures used across Waterwatch services.
//! These types are shared between the orchestrator (which owns and mutates them)
//! and the client (which only reads them back over HTTP).

pub mod event;
pub mod health;
pub mod job;
pub mod source;
