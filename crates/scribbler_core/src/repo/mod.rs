//! Registry persistence contracts and the SQLite implementation.
//!
//! # Responsibility
//! - Keep SQL details out of the notebook orchestration code.
//!
//! # Invariants
//! - Storage errors are reported as `RepoError`, never panics.

pub mod registry_repo;
