//! Synchronization with the remote reconciliation service.
//!
//! The orchestrator drains the durable mutation store in batches; the
//! client carries the batches over HTTP; the protocol module defines the
//! wire shapes. The remote side must treat item ids idempotently
//! (upsert-by-id), which makes the at-least-once retry behavior here safe.

pub mod client;
pub mod orchestrator;
pub mod protocol;

pub use client::{ClientError, ReconcileClient};
pub use orchestrator::{BackoffPolicy, DrainOutcome, DrainReport, SyncOrchestrator};
pub use protocol::{
    BatchItem, ItemResult, RemoteStatus, SyncBatch, SyncBatchRequest, SyncBatchResponse,
};
