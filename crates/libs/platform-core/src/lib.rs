//! # platform-core: domain model and storage for the platform
//!
//! `platform-core` owns everything that isn't HTTP: the BMC data model,
//! the git repository store, the authorization engine, credential
//! validation, and the durable event bus that connects pushes to CI runs
//! and workspace lifecycle changes.
//!
//! ## Key modules
//!
//! - [`model`]: BMC controllers and data models for every entity
//! - [`store`]: database pool setup, subprocess git plumbing, per-resource locks
//! - [`ctx`]: request context for RBAC
//! - [`authz`]: pure authorization decisions over users, repositories, and grants
//! - [`credential_registry`]: password and access-token validation
//! - [`event_bus`]: durable, at-least-once in-process event delivery
//! - [`repository_store`]: git content operations (tree, blob, diff, merge)

/// Pure authorization decisions over repository grants and roles.
pub mod authz;

/// Password hashing and access-token validation.
pub mod credential_registry;

/// Request context for authentication and authorization.
pub mod ctx;

/// Error types and Result alias for platform-core operations.
pub mod error;

/// Durable, at-least-once in-process event bus.
pub mod event_bus;

/// Backend Model Controllers (BMC) and data models for all entities.
pub mod model;

/// Git content operations: tree, blob, diff, branches, merge.
pub mod repository_store;

/// Low-level storage operations: database pool, git plumbing, resource locks.
pub mod store;

/// Strong newtypes for domain identifiers.
pub mod types;

/// Validation and other shared helpers.
pub mod utils;

// Re-export core types
pub use ctx::Ctx;
pub use error::{Error, Result};
pub use model::ModelManager;
