//! Configuration types and helpers.

mod pod;
mod runtime;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use pod::*;
pub use runtime::*;
