//! Domain model for tracked notebook content.
//!
//! # Responsibility
//! - Define the record shared by notes and appendices.
//! - Derive output artifact paths and staleness from the filesystem.
//!
//! # Invariants
//! - Every record is keyed by its source file name in the registry.

pub mod content;
