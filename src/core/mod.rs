// Core bot supervision: snapshots, reconciliation, events, tasks, registry.

pub mod events;
pub mod filter;
pub mod manager;
pub mod reconciler;
pub mod snapshot;
pub mod tasks;
