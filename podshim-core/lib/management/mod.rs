//! Sandbox teardown orchestration.

mod container_stop;
mod mounts;
mod sandbox_stop;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use container_stop::*;
pub use mounts::*;
pub use sandbox_stop::*;
