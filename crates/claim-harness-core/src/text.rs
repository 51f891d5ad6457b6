//! Character-level text helpers shared by the extractor, normalizer, and
//! entity resolver.
//!
//! All lengths are counted in Unicode scalar values, never bytes.

use std::collections::HashSet;

static_regex!(whitespace_re, r"\s+");
static_regex!(cjk_re, r"[ぁ-んァ-ヶ一-龠]");
static_regex!(alias_strip_re, r"[^\wぁ-んァ-ヶ一-龠ー ]");
static_regex!(coverage_strip_re, r#"[。、！？・,.;:()（）「」『』"'`]"#);

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    whitespace_re().replace_all(text.trim(), " ").into_owned()
}

/// Keep at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Collapse whitespace, then cut to `max` characters with a trailing `...`.
pub fn clamp_text(text: &str, max: usize) -> String {
    let collapsed = collapse_whitespace(text);
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let mut out = truncate_chars(&collapsed, max.saturating_sub(3));
    out.push_str("...");
    out
}

/// True when the text contains kana or kanji.
pub fn has_cjk(text: &str) -> bool {
    cjk_re().is_match(text)
}

/// Normalized lookup form for aliases and dimension values.
pub fn normalize_alias(text: &str) -> String {
    let lowered = collapse_whitespace(text).to_lowercase();
    alias_strip_re()
        .replace_all(&lowered, "")
        .trim()
        .to_string()
}

/// Whitespace-free, lowercase, punctuation-free form used for coverage tests.
pub fn coverage_key(text: &str) -> String {
    let squeezed: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    coverage_strip_re().replace_all(&squeezed, "").into_owned()
}

/// Character bigrams. Texts of two characters or fewer yield themselves.
pub fn char_bigrams(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= 2 {
        return HashSet::from([text.to_string()]);
    }
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_text() {
        assert_eq!(clamp_text("  a   b  ", 10), "a b");
        assert_eq!(clamp_text("abcdefghij", 6), "abc...");
        assert_eq!(clamp_text("あいうえおかき", 5), "あい...");
    }

    #[test]
    fn test_has_cjk() {
        assert!(has_cjk("雨が降った"));
        assert!(has_cjk("retry 戦略"));
        assert!(!has_cjk("it rained"));
    }

    #[test]
    fn test_normalize_alias() {
        assert_eq!(normalize_alias("  Tanaka-san!  "), "tanakasan");
        assert_eq!(normalize_alias("田中  さん"), "田中 さん");
        assert_eq!(normalize_alias("!!!"), "");
    }

    #[test]
    fn test_coverage_key_and_bigrams() {
        assert_eq!(coverage_key("洗濯 した。"), "洗濯した");
        assert_eq!(char_bigrams("ab").len(), 1);
        assert_eq!(char_bigrams("abc").len(), 2);
    }
}
