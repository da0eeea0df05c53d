//! Module containing terminal utilities

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Determines if stderr is attached to a terminal that understands ANSI colors.
///
/// Log output goes to stderr, so that is the stream that decides whether colored output is used.
pub fn is_ansi_terminal() -> bool {
    let stderr_is_tty = unsafe { libc::isatty(libc::STDERR_FILENO) == 1 };

    match std::env::var("TERM") {
        Ok(term) => stderr_is_tty && term != "dumb",
        Err(_) => {
            if stderr_is_tty {
                tracing::debug!("detected TTY without TERM environment variable");
            }
            stderr_is_tty
        }
    }
}
