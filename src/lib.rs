//! slotbook — per-tenant slot reservation and booking engine.
//!
//! Each tenant owns an [`engine::Engine`]: staff timelines of appointments
//! and short-lived holds, durably logged to a write-ahead log. Transport,
//! request validation, and directory data (clients, services) live outside
//! this crate.

pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod tenant;
pub mod wal;
