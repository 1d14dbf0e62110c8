//! Offline-first mutation sync for hospital-operations clients.
//!
//! Foreground views hand their entity-mutating requests to the
//! [`interceptor::RequestRouter`]. While the remote service is reachable
//! the calls forward live; when it is not, mutations are captured into the
//! durable [`db::MutationStore`] and acknowledged with a synthetic
//! accepted-offline response. The [`agent::BackgroundAgent`] later drains
//! the store through the [`sync::SyncOrchestrator`], which submits batches
//! to the remote reconciliation endpoint and records per-item outcomes,
//! while the [`broadcast::StatusBroadcaster`] keeps attached views
//! informed.

pub mod agent;
pub mod broadcast;
pub mod commands;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod interceptor;
pub mod models;
pub mod server;
pub mod sync;
