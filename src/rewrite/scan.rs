//! Byte-level search helpers shared by the body rewriters.
//!
//! Every needle is a short ASCII literal, so these run in O(haystack) time.

/// Case-insensitive search for an ASCII `needle` starting at `from`.
pub fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || from > hay.len() || hay.len() - from < needle.len() {
        return None;
    }
    let first = needle[0].to_ascii_lowercase();
    (from..=hay.len() - needle.len()).find(|&i| {
        hay[i].to_ascii_lowercase() == first && hay[i..i + needle.len()].eq_ignore_ascii_case(needle)
    })
}

/// Bytes that continue a JS/CSS identifier.
pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'-'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_ci_basics() {
        assert_eq!(find_ci("<HTML><Body>", "<body", 0), Some(6));
        assert_eq!(find_ci("abc", "abcd", 0), None);
        assert_eq!(find_ci("abcabc", "ABC", 1), Some(3));
        assert_eq!(find_ci("abc", "c", 5), None);
    }
}
