//! `permgraph-core` — primitives shared by the permission model and its stores.
//!
//! This crate contains **pure** building blocks (no IO, no clocks, no storage).

pub mod error;
pub mod name;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use name::{EntityKind, EntityName};
pub use version::ExpectedVersion;
