//! Helpers for building POSIX shell command strings.

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Quotes a value so a POSIX shell treats it as a single literal word.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c))
    {
        return value.to_string();
    }

    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Builds a command that writes `contents` to `path` as root through `tee`.
pub fn write_file_command(path: &str, contents: &str) -> String {
    format!(
        "printf '%s' {} | sudo tee {} > /dev/null",
        shell_quote(contents),
        shell_quote(path)
    )
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/etc/docker"), "/etc/docker");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_write_file_command() {
        assert_eq!(
            write_file_command("/etc/default/docker", "DOCKER_OPTS='-D'\n"),
            r"printf '%s' 'DOCKER_OPTS='\''-D'\''
' | sudo tee /etc/default/docker > /dev/null"
        );
    }
}
