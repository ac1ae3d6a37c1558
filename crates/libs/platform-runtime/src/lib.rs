//! Sandboxed action execution and workspace container lifecycle.
//!
//! Three pieces, all built on the [`container_runtime::ContainerRuntime`]
//! abstraction over `docker`/`podman`:
//!
//! - [`sandbox::SandboxRunner`] — runs a single action in a network-disabled
//!   container with a capped output buffer.
//! - [`orchestrator::ActionOrchestrator`] — polls `action_runs` for queued
//!   work and drives it through the sandbox runner.
//! - [`supervisor::WorkspaceSupervisor`] — owns workspace start/stop,
//!   port allocation, and the repository checkout that seeds a
//!   workspace's project directory.

pub mod container_runtime;
pub mod error;
pub mod orchestrator;
pub mod sandbox;
pub mod supervisor;

pub use container_runtime::{CliContainerRuntime, ContainerRuntime, ContainerSpec, ContainerState};
pub use error::{Error, Result};
pub use orchestrator::ActionOrchestrator;
pub use sandbox::{SandboxRequest, SandboxRunner};
pub use supervisor::{PortAllocator, WorkspaceSupervisor};
