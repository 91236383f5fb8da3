//! Username equality rule.
//!
//! Two usernames collide when they are equal after lowercasing, canonical
//! decomposition and dropping every combining mark, so `userName`,
//! `username` and `userNąme` all map to `username`.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a username for uniqueness comparison.
pub fn normalize_username(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let lowered: String = name.trim().chars().flat_map(char::to_lowercase).collect();
    for c in lowered.nfd().filter(|c| !is_combining_mark(*c)) {
        match fold_base_letter(c) {
            Some(base) => out.push_str(base),
            None => out.push(c),
        }
    }
    out
}

/// Whether two usernames collide.
pub fn usernames_collide(a: &str, b: &str) -> bool {
    normalize_username(a) == normalize_username(b)
}

// Latin letters with a built-in stroke or ligature have no canonical
// decomposition.
fn fold_base_letter(c: char) -> Option<&'static str> {
    let base = match c {
        'æ' => "ae",
        'đ' | 'ð' => "d",
        'ħ' => "h",
        'ı' => "i",
        'ĳ' => "ij",
        'ł' | 'ŀ' => "l",
        'ø' => "o",
        'œ' => "oe",
        'ß' => "ss",
        'ŧ' => "t",
        'þ' => "th",
        _ => return None,
    };
    Some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        assert!(usernames_collide("userName", "username"));
        assert!(usernames_collide("USERNAME", "username"));
    }

    #[test]
    fn test_diacritic_insensitive() {
        assert!(usernames_collide("userName", "userNąme"));
        assert!(usernames_collide("żółw", "zolw"));
        assert!(usernames_collide("Straße", "strasse"));
    }

    #[test]
    fn test_latin_extended_additional_letters_fold() {
        for name in ["userNầme", "userNǻme", "userNȧme", "ǘsername", "ùsẽrnạmẹ", "USERNẦME"] {
            assert!(usernames_collide(name, "username"), "{name} should fold");
        }
    }

    #[test]
    fn test_decomposed_marks_are_dropped() {
        // "a" followed by a combining ogonek
        assert!(usernames_collide("userna\u{0328}me", "username"));
        // stacked marks outside the basic combining block
        assert!(usernames_collide("usern\u{1ea1}\u{1dc4}me", "username"));
    }

    #[test]
    fn test_distinct_names() {
        assert!(!usernames_collide("alice", "alicia"));
        assert_eq!(normalize_username("  Bob "), "bob");
    }
}
