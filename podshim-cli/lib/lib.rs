//! `podshim-cli` holds the argument parsing and error types of the `podshim` binary.

#![warn(missing_docs)]

mod args;
mod error;
mod styles;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use args::*;
pub use error::*;
pub use styles::*;
