//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Filing fingerprints into duplicate groups as results arrive
//! - Orientation-tolerant matching via fingerprint variants
//! - Retracting addresses with stable renumbering of the remaining groups

pub mod groups;

pub use groups::{DuplicateGroup, IndexError, Insertion, MatchIndex, Removal};
