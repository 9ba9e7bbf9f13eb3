#![forbid(unsafe_code)]

//! meshbus-lib: shared foundation for the meshbus service mesh.
//!
//! This library provides functionality shared across all meshbus
//! components:
//! - Configuration management with hierarchical overrides
//! - Logging bootstrap built on tracing
//! - Node descriptor models exchanged during discovery

pub mod config;
pub mod logging;
pub mod models;
