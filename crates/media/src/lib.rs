mod error;
mod extract;
mod fetch;
mod upload;

pub use error::{Error, Result};
pub use extract::Extractor;
pub use fetch::Fetcher;
pub use upload::UploadSink;

/// Last interesting slice of a tool's stderr, for error objects. Keeps the
/// trailing non-empty lines, bounded so the row stays readable.
pub(crate) fn stderr_tail(stderr: &[u8], max_len: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let tail: Vec<&str> = text
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(3)
        .collect();
    let mut joined = tail
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("\n");
    if joined.len() > max_len {
        let mut start = joined.len() - max_len;
        while !joined.is_char_boundary(start) {
            start += 1;
        }
        joined = joined[start..].to_string();
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::stderr_tail;

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr = b"line one\nline two\n\nERROR: 403 Forbidden\n";
        let tail = stderr_tail(stderr, 400);
        assert!(tail.ends_with("ERROR: 403 Forbidden"));
        assert!(!tail.contains("line one") || tail.lines().count() <= 3);
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let long = "x".repeat(2000);
        let tail = stderr_tail(long.as_bytes(), 400);
        assert!(tail.len() <= 400);
    }

    #[test]
    fn stderr_tail_empty_input() {
        assert_eq!(stderr_tail(b"", 400), "");
    }
}
