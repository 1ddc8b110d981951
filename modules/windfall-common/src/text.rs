/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundary() {
        let text = "prize 世界";
        let truncated = truncate_utf8(text, 8);
        assert!(truncated.len() <= 8);
        assert!(text.starts_with(truncated));
    }

    #[test]
    fn exact_length_for_ascii() {
        assert_eq!(truncate_utf8(&"a".repeat(100), 40).len(), 40);
    }

    #[test]
    fn short_input_untouched() {
        assert_eq!(truncate_utf8("deadline", 100), "deadline");
    }
}
