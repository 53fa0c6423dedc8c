//! Connect-code helpers.
//!
//! A connect code is a short alphanumeric tag, a `#`, and a numeric suffix
//! (`ABC#123`). Codes are compared case-insensitively, so every key built here
//! goes through [`normalize_code`] first.

/// Separator used inside a canonical pair key.
pub const PAIR_SEPARATOR: char = '|';

/// Trim and upper-case a code. Returns `None` for blank input.
pub fn normalize_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_uppercase())
}

/// Build the order-independent key for two codes.
///
/// The members are sorted lexicographically, so `pair_key(a, b)` and
/// `pair_key(b, a)` always collide. Inputs are used as given; normalize them
/// beforehand if they come from user input.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}{PAIR_SEPARATOR}{b}")
    } else {
        format!("{b}{PAIR_SEPARATOR}{a}")
    }
}

/// Split a pair key back into its two members.
pub fn split_pair_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(PAIR_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  abc#123 "), Some("ABC#123".to_string()));
        assert_eq!(normalize_code("   "), None);
        assert_eq!(normalize_code(""), None);
    }

    #[test]
    fn test_pair_key_is_order_independent() {
        assert_eq!(pair_key("AB12#034", "XYZ#5678"), "AB12#034|XYZ#5678");
        assert_eq!(pair_key("XYZ#5678", "AB12#034"), "AB12#034|XYZ#5678");
    }

    #[test]
    fn test_split_pair_key() {
        let key = pair_key("B#111", "A#222");
        assert_eq!(split_pair_key(&key), Some(("A#222", "B#111")));
        assert_eq!(split_pair_key("nope"), None);
    }
}
