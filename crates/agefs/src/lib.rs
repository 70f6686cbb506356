#![forbid(unsafe_code)]
//! agefs public API facade.
//!
//! Re-exports the aging engine through a stable external interface.
//! This is the crate downstream consumers depend on.

pub use agefs_engine::*;
