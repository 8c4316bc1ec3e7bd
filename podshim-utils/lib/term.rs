//! Terminal styling helpers.

use std::sync::LazyLock;

use console::style;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// A green check mark, for successful steps.
pub static CHECKMARK: LazyLock<String> =
    LazyLock::new(|| format!("{}", style("✓").green().bold()));

/// A red cross, for failed steps.
pub static CROSS: LazyLock<String> = LazyLock::new(|| format!("{}", style("✗").red().bold()));
