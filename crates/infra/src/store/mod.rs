//! Hierarchy store boundary.
//!
//! Persistence is an external concern; this module defines the transactional
//! contract the engine needs and an in-memory implementation for tests/dev.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryHierarchyStore;
pub use r#trait::{HierarchyStore, HierarchyTx, StoreError};
