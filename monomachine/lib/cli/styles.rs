use std::fmt::Write;

use clap::builder::styling::{AnsiColor, Effects, Style, Styles};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

#[cfg(not(test))]
/// Whether stderr is an ANSI-capable terminal.
static IS_ANSI_TERMINAL: std::sync::LazyLock<bool> =
    std::sync::LazyLock::new(machutils::term::is_ansi_terminal);

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Applies the CLI [`styles`] to text printed outside of clap.
pub trait AnsiStyles {
    /// Table and section headers.
    fn header(&self) -> String;

    /// Names the user can type back, such as host names.
    fn literal(&self) -> String;

    /// Failures.
    fn error(&self) -> String;

    /// Healthy states.
    fn valid(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The styles of the monomachine CLI.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
}

fn apply_style(text: &str, style: &Style) -> String {
    #[cfg(not(test))]
    if !*IS_ANSI_TERMINAL {
        return text.to_string();
    }

    #[cfg(test)]
    if std::env::var("TERM").unwrap_or_default() == "dumb" {
        return text.to_string();
    }

    let mut styled = String::with_capacity(text.len() + 20);
    let _ = write!(styled, "{style}");
    styled.push_str(text);
    let _ = write!(styled, "{}", style.render_reset());
    styled
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<T: AsRef<str>> AnsiStyles for T {
    fn header(&self) -> String {
        apply_style(self.as_ref(), styles().get_header())
    }

    fn literal(&self) -> String {
        apply_style(self.as_ref(), styles().get_literal())
    }

    fn error(&self) -> String {
        apply_style(self.as_ref(), styles().get_error())
    }

    fn valid(&self) -> String {
        apply_style(self.as_ref(), styles().get_valid())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_styles_follow_terminal() {
        let previous = std::env::var("TERM").ok();

        std::env::set_var("TERM", "dumb");
        assert_eq!("dev".header(), "dev");
        assert_eq!(String::from("dev").error(), "dev");

        std::env::set_var("TERM", "xterm-256color");
        let valid = "Running".valid();
        assert!(valid.contains("\x1b[32m"));
        assert!(valid.contains("Running"));
        assert!(valid.ends_with("\x1b[0m"));
        assert!("dev".literal().contains("\x1b[34m"));

        match previous {
            Some(term) => std::env::set_var("TERM", term),
            None => std::env::remove_var("TERM"),
        }
    }
}
