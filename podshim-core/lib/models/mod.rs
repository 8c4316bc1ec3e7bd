//! Records for the objects a pod teardown acts on.

mod container;
mod netns;
mod sandbox;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use container::*;
pub use netns::*;
pub use sandbox::*;
