//! Pod network teardown.

mod cni;
mod plugin;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cni::*;
pub use plugin::*;
