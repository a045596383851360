//! Water data ingestion orchestrator
//!
//! Recurring source loops, a prioritized job pool for on-demand work, change
//! detection over synced records and live fan-out of the resulting events.

pub mod api;
pub mod backoff;
pub mod broker;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod notify;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod source;
pub mod storage;
pub mod sync;
