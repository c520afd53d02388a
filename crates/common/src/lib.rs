//! Shared types and utilities for the kiln engine.
//!
//! # Invariants
//! - Object ids are unique for the lifetime of the process and never reused.
//! - A slot value is either used or free, never both.

mod slot;
mod types;

pub use slot::{SlotAllocator, SlotError};
pub use types::{ObjectId, Transform};
