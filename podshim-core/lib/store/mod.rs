//! Registries of sandboxes and containers, and their on-disk snapshot.

mod container;
mod sandbox;
mod state_file;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use container::*;
pub use sandbox::*;
pub use state_file::*;
