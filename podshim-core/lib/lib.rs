//! `podshim-core` tears down pod sandboxes for a container runtime shim.
//!
//! # Overview
//!
//! A pod sandbox is a group of containers sharing a network namespace, held together by an infra
//! process. Stopping one means stopping every member container, releasing the sandbox's mounts,
//! stopping the infra process and removing the pod network. The sandbox may be in an `Unknown`
//! state left behind by a crash, and teardown has to converge it all the same.
//!
//! # Modules
//!
//! - [`config`] - Runtime and per-sandbox configuration
//! - [`management`] - The teardown orchestrator and container stop
//! - [`models`] - Sandboxes, containers and network namespaces
//! - [`network`] - Network plugins and the CNI runner
//! - [`runtime`] - Tasks, exit monitoring and exit handling
//! - [`store`] - Sandbox and container registries and their state file

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod config;
pub mod management;
pub mod models;
pub mod network;
pub mod runtime;
pub mod store;

pub use error::*;
