//! Small, dependency-free byte/string helpers shared by a couple of
//! components that otherwise have nothing in common.

/// The first `\n`-terminated (or final, unterminated) line of `bytes`,
/// as UTF-8. Used by the fan-in election to read back the first ballot
/// written to the candidate file, which decides the winner.
pub fn first_line(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let line = text.lines().next()?;
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_first_of_several_lines() {
        assert_eq!(first_line(b"123\n456\n"), Some("123".to_string()));
    }

    #[test]
    fn single_line_without_trailing_newline() {
        assert_eq!(first_line(b"42"), Some("42".to_string()));
    }

    #[test]
    fn empty_input_has_no_first_line() {
        assert_eq!(first_line(b""), None);
    }
}
