//! Core data types for modlock.
//!
//! This crate defines the types shared by every stage of the pipeline:
//! semantic versions and constraint ranges, the metadata-source interface,
//! file-conflict strategies and actions, profiles/lockfiles with their
//! on-disk store, and user configuration.
//!
//! This crate is intentionally free of graph algorithms and network I/O.

pub mod config;
pub mod decision;
pub mod lockfile;
pub mod metadata;
pub mod version;
