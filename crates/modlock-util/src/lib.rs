//! Shared utilities for modlock.
//!
//! This crate provides cross-cutting concerns used by all other modlock crates:
//! the unified error type, filesystem helpers (including the atomic
//! write-replace used for lockfiles), and SHA-256 hashing.

pub mod errors;
pub mod fs;
pub mod hash;
