//! Trivial source listing around the current line.

use std::path::Path;

/// How many lines of context the listings show around the current line
pub const CONTEXT_LINES: u64 = 2;

/// Prints a window of the source file with a `>` cursor on `line`.
///
/// A missing or unreadable source file prints nothing; being unable to
/// show source is not an error.
pub fn print_source(path: &Path, line: u64, context: u64) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    print!("{}", render_listing(&content, line, context));
}

fn render_listing(content: &str, line: u64, context: u64) -> String {
    let start = line.saturating_sub(context).max(1);
    let end = line + context;

    let mut out = String::new();
    for (idx, text) in content.lines().enumerate() {
        let current = idx as u64 + 1;
        if current < start || current > end {
            continue;
        }
        out.push_str(if current == line { "> " } else { "  " });
        out.push_str(text);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    const FILE: &str = "one\ntwo\nthree\nfour\nfive\nsix\n";

    #[test]
    fn test_cursor_on_current_line() {
        let listing = render_listing(FILE, 3, 1);
        assert_eq!(listing, "  two\n> three\n  four\n");
    }

    #[test]
    fn test_window_clamps_at_file_start() {
        let listing = render_listing(FILE, 1, 2);
        assert_eq!(listing, "> one\n  two\n  three\n");
    }

    #[test]
    fn test_window_clamps_at_file_end() {
        let listing = render_listing(FILE, 6, 2);
        assert_eq!(listing, "  four\n  five\n> six\n");
    }
}
