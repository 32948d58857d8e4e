use std::sync::LazyLock;

use regex::Regex;

static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_]").unwrap());
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{M}\p{N}\- ]").unwrap());
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ -]+").unwrap());

/// Symbols that carry meaning in names ("C++", "C#", "Arts & Crafts") and are spelled out
/// instead of dropped.
const SPELLED: [(char, &str); 3] = [('+', " plus "), ('#', " sharp "), ('&', " and ")];

/// Lowercase, dash-separated form of `input` used for category ids, blog slugs and
/// upload names. Letters and digits of any script are kept.
pub fn slugify(input: &str) -> String {
    let mut spelled = UNDERSCORES.replace_all(input, " ").into_owned();
    for (symbol, word) in SPELLED {
        if spelled.contains(symbol) {
            spelled = spelled.replace(symbol, word);
        }
    }
    let cleaned = DISALLOWED.replace_all(&spelled, "");

    SEPARATORS
        .replace_all(cleaned.trim(), "-")
        .trim_matches('-')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn test_basic() {
        assert_eq!(slugify("hello_world"), "hello-world");
        assert_eq!(slugify("Rust-lang"), "rust-lang");
        assert_eq!(slugify("clean-this_text!"), "clean-this-text");
    }

    #[test]
    fn test_leading_trailing_spaces() {
        assert_eq!(slugify("   hello   "), "hello");
        assert_eq!(slugify("  multiple   spaces  "), "multiple-spaces");
    }

    #[test]
    fn test_special_characters() {
        assert_eq!(slugify("!@$%^*()"), "");
        assert_eq!(slugify("abc123!@"), "abc123");
    }

    #[test]
    fn test_spelled_symbols() {
        assert_eq!(slugify("C++"), "c-plus-plus");
        assert_eq!(slugify("C#"), "c-sharp");
        assert_eq!(slugify("Arts & Crafts"), "arts-and-crafts");
        assert_ne!(slugify("C"), slugify("C++"));
    }

    #[test]
    fn test_keeps_other_scripts() {
        assert_eq!(slugify("Électricité"), "électricité");
        assert_eq!(slugify("水道 工事"), "水道-工事");
        assert_eq!(slugify("Ремонт_квартир"), "ремонт-квартир");
    }

    #[test]
    fn test_underscores_and_dashes() {
        assert_eq!(slugify("hello_world - test"), "hello-world-test");
        assert_eq!(slugify("_start_end_"), "start-end");
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("     "), "");
    }
}
