//! Authorization core - role graph resolution, caching and access decisions
//!
//! This module implements the RBAC engine:
//! - Effective-permission resolution over role inheritance
//! - Per-user permission cache with tagged invalidation
//! - Access decision point that audits every decision
//! - Mutation API that keeps the role graph acyclic

pub mod admin;
pub mod cache;
pub mod decision;
pub mod resolver;

pub use admin::RbacService;
pub use cache::{CacheStats, Invalidation, PermissionCache, PermissionSource};
pub use decision::AccessDecisionPoint;
pub use resolver::PermissionResolver;

/// Resources guarding the admin surface
pub mod resources {
    pub const ROLE: &str = "ROLE";
    pub const PERMISSION: &str = "PERMISSION";
    pub const USER: &str = "USER";
    pub const AUDIT: &str = "AUDIT";
}

/// Actions used by the admin surface
pub mod actions {
    pub const VIEW: &str = "VIEW";
    pub const MANAGE: &str = "MANAGE";
    pub const CHECK: &str = "CHECK";
}
