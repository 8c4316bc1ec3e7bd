use clap::builder::styling::{AnsiColor, Effects, Styles};
use console::style;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Terminal styles for values printed by the CLI.
pub trait AnsiStyles {
    /// Styles a value the user typed or can copy back.
    fn literal(&self) -> String;

    /// Styles a section header.
    fn header(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<T: AsRef<str>> AnsiStyles for T {
    fn literal(&self) -> String {
        style(self.as_ref()).yellow().to_string()
    }

    fn header(&self) -> String {
        style(self.as_ref()).bold().underlined().to_string()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Help styles for the argument parser.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
}
