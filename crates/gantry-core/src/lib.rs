//! Core types and shared utilities for the Gantry integration engine.
//!
//! This crate provides:
//! - Domain items with natural-key identity ([`Item`], [`ItemLevel`])
//! - Typed change events ([`ChangeEvent`], [`EventKind`])
//! - Sliding time windows ([`DatetimeInterval`])
//! - Deterministic pseudo-identity minting ([`IdentityMinter`], [`HashMinter`])
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod identity;
mod interval;
mod item;
pub mod metrics;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Default capacity of a discovery dedup queue. Bounds memory while keeping
/// enough history to suppress re-emission across overlapping query windows.
pub const DEFAULT_DEDUP_CAPACITY: usize = 200;

pub use error::{Error, Result};
pub use event::{ChangeEvent, EventKind};
pub use identity::{HashMinter, IdentityMinter};
pub use interval::DatetimeInterval;
pub use item::{
    Item, ItemLevel, META_CONTENT_TIME, META_PATIENT_DOB, META_PATIENT_GENDER, META_PATIENT_NAME,
};
