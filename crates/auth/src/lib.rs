//! `permgraph-auth` — permission model and resolution (pure, no IO).
//!
//! This crate is decoupled from storage: the resolver reads the hierarchy
//! through the [`HierarchyView`] trait and never mutates it.

pub mod display;
pub mod entity;
pub mod entry;
pub mod membership;
pub mod permissions;
pub mod resolver;
pub mod scope;
pub mod view;

pub use entity::PermissionEntity;
pub use entry::Entry;
pub use membership::{MemberStatus, Membership};
pub use permissions::Permission;
pub use resolver::{
    Contributor, Explanation, PermissionResolver, PermissionState, ResolveQuery, ResolvedEntry,
    ResolvedPermissions,
};
pub use scope::{Scope, Specificity};
pub use view::HierarchyView;
