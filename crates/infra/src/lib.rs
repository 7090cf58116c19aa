//! Infrastructure layer: hierarchy stores, transactions, mutations and the
//! service facade.

pub mod config;
pub mod membership;
pub mod mutator;
pub mod notify;
pub mod service;
pub mod store;
pub mod transaction;


pub use config::{EngineConfig, RetryPolicy};
pub use notify::{NoopNotifier, RecordingNotifier, Refresh, RefreshNotifier};
pub use service::{GroupDetails, PermissionService};
pub use store::{HierarchyStore, HierarchyTx, InMemoryHierarchyStore, StoreError};
pub use transaction::{Attempt, TransactionCoordinator, TransactionError};
