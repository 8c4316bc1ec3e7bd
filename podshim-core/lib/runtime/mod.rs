//! Task runtime contracts and exit-event handling.
//!
//! - [`Task`] and [`TaskService`] abstract the OS processes behind infra and member containers
//! - [`ProcessTaskService`] backs them with real processes
//! - [`ExitMonitor`] turns a task's exit stream into a call to [`ExitHandler`]

mod monitor;
mod process;
mod task;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use monitor::*;
pub use process::*;
pub use task::*;
