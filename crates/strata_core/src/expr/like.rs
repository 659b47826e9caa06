use regex::{Regex, escape};
use strata_error::{Result, ResultExt};

/// Escape character recognized in LIKE patterns.
pub const LIKE_ESCAPE: char = '\\';

/// Compile a LIKE pattern into an anchored regex.
pub fn like_pattern_to_regex(pattern: &str) -> Result<Regex> {
    let mut buf = String::with_capacity(pattern.len() + 8);
    buf.push_str("(?s)^");

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            LIKE_ESCAPE => {
                // Escape at the end of the pattern is literal.
                let next = chars.next().unwrap_or(LIKE_ESCAPE);
                buf.push_str(&escape(&next.to_string()));
            }
            '%' => buf.push_str(".*"),
            '_' => buf.push('.'),
            c => buf.push_str(&escape(&c.to_string())),
        }
    }
    buf.push('$');

    Regex::new(&buf).context("Failed to build regex for LIKE pattern")
}

/// Literal prefix of a LIKE pattern, up to the first wildcard.
///
/// Every matching string starts with this prefix.
pub fn like_prefix(pattern: &str) -> String {
    let mut prefix = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' | '_' => break,
            LIKE_ESCAPE => prefix.push(chars.next().unwrap_or(LIKE_ESCAPE)),
            c => prefix.push(c),
        }
    }
    prefix
}

/// Smallest string greater than every string starting with `prefix`.
///
/// `None` if no such string exists.
pub fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards() {
        let re = like_pattern_to_regex("a%c_").unwrap();
        assert!(re.is_match("abbbcd"));
        assert!(re.is_match("acd"));
        assert!(!re.is_match("acdd"));
        assert!(!re.is_match("xacd"));
    }

    #[test]
    fn regex_chars_are_literal() {
        let re = like_pattern_to_regex("a.b*").unwrap();
        assert!(re.is_match("a.b*"));
        assert!(!re.is_match("axb"));
    }

    #[test]
    fn escaped_wildcards() {
        let re = like_pattern_to_regex(r"100\%").unwrap();
        assert!(re.is_match("100%"));
        assert!(!re.is_match("1000"));
    }

    #[test]
    fn percent_matches_newlines() {
        let re = like_pattern_to_regex("a%b").unwrap();
        assert!(re.is_match("a\nb"));
    }

    #[test]
    fn prefixes() {
        assert_eq!("ab", like_prefix("ab%c"));
        assert_eq!("a%", like_prefix(r"a\%_"));
        assert_eq!("", like_prefix("%"));
        assert_eq!(Some("ac".to_string()), prefix_upper_bound("ab"));
        assert_eq!(None, prefix_upper_bound(""));
    }
}
