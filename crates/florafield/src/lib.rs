//! Umbrella crate for Florafield.
//!
//! This crate is intentionally small: it re-exports the engine and protocol
//! crates so downstream code can depend on a single crate name (`florafield`).

pub use florafield_engine as engine;
pub use florafield_protocol as protocol;
