//! Data Transfer Objects
//!
//! Lightweight request/response types exchanged between the orchestrator,
//! its HTTP clients, and live WebSocket subscribers.

pub mod health;
pub mod job;
pub mod notify;
pub mod scheduler;
