/// Find the largest valid UTF-8 boundary at or before the given byte index.
/// Returns the byte index that is safe to slice at.
#[inline]
fn safe_byte_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    s.char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_bytes)
        .last()
        .unwrap_or(0)
}

/// Truncate a string to maximum character count (UTF-8 safe).
///
/// This function is O(n) where n is the character count, but guarantees
/// correct handling of multi-byte UTF-8 characters.
/// Adds "..." suffix if truncated.
#[inline]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", truncated)
}

/// Truncate a string to at most `max_bytes`, preferring a sentence boundary.
///
/// Searches backward within the window for the nearest `". "` or newline;
/// when that boundary falls past the midpoint of the window the cut happens
/// there instead of at the hard byte limit. The hard limit is adjusted to a
/// valid UTF-8 boundary, never mid-character.
pub fn truncate_at_sentence(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let hard = safe_byte_boundary(s, max_bytes);
    let window = &s[..hard];
    let sentence = window.rfind(". ").map(|i| i + 1);
    let newline = window.rfind('\n');
    let boundary = match (sentence, newline) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    match boundary {
        Some(b) if b > hard / 2 => &s[..b],
        _ => window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_short() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_chars_long() {
        assert_eq!(truncate_chars("hello world", 8), "hello...");
    }

    #[test]
    fn test_truncate_chars_unicode() {
        let result = truncate_chars("안녕하세요 세계", 6);
        assert_eq!(result, "안녕하...");
    }

    #[test]
    fn test_truncate_at_sentence_short_input() {
        assert_eq!(truncate_at_sentence("hello", 100), "hello");
    }

    #[test]
    fn test_truncate_at_sentence_prefers_boundary() {
        let text = "First sentence here. Second sentence is much longer and keeps going";
        let cut = truncate_at_sentence(text, 35);
        assert_eq!(cut, "First sentence here.");
    }

    #[test]
    fn test_truncate_at_sentence_hard_cut_when_boundary_early() {
        // The only boundary sits before the midpoint of the window, so the
        // hard limit wins.
        let text = "Hi. aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let cut = truncate_at_sentence(text, 40);
        assert_eq!(cut.len(), 40);
    }

    #[test]
    fn test_truncate_at_sentence_newline_boundary() {
        let text = "line one\nline two\nline three continues well past the limit";
        let cut = truncate_at_sentence(text, 30);
        assert_eq!(cut, "line one\nline two");
    }

    #[test]
    fn test_truncate_at_sentence_unicode_safe() {
        let text = "안녕하세요 세계입니다 그리고 더 많은 텍스트가 여기에 있습니다";
        let cut = truncate_at_sentence(text, 20);
        assert!(cut.len() <= 20);
        assert!(!cut.contains('\u{FFFD}'));
    }
}
