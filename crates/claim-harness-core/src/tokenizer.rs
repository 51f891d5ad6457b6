//! Morphological tokenizer abstraction.
//!
//! The rule extractor and fact dedup work best with lemmas and parts of
//! speech, but a tokenizer is optional. Every caller treats an empty token
//! list as "tokenizer unavailable" and falls back to character heuristics.
//!
//! # Implementations
//!
//! | Provider | Type | Behaviour |
//! |----------|------|-----------|
//! | `disabled` | [`DisabledTokenizer`] | Always returns no tokens |
//! | `script` | [`ScriptRunTokenizer`] | Splits on script changes; no dictionary |

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Coarse part-of-speech tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartOfSpeech {
    Noun,
    Verb,
    Adjective,
    Particle,
    Symbol,
    Other,
}

impl PartOfSpeech {
    /// Content words eligible for fact objects.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            PartOfSpeech::Noun | PartOfSpeech::Verb | PartOfSpeech::Adjective
        )
    }
}

/// One token of tokenizer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorphToken {
    pub surface: String,
    pub lemma: String,
    pub pos: PartOfSpeech,
}

impl MorphToken {
    /// Lowercased lemma, falling back to the surface form.
    pub fn normalized_lemma(&self) -> String {
        let lemma = self.lemma.trim();
        if lemma.is_empty() {
            self.surface.trim().to_lowercase()
        } else {
            lemma.to_lowercase()
        }
    }
}

/// Splits text into tokens. Never fails.
pub trait Tokenizer: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    fn tokenize(&self, text: &str) -> Vec<MorphToken>;
}

// ============ Disabled ============

/// Used when `tokenizer.provider = "disabled"`.
pub struct DisabledTokenizer;

impl Tokenizer for DisabledTokenizer {
    fn name(&self) -> &str {
        "disabled"
    }

    fn tokenize(&self, _text: &str) -> Vec<MorphToken> {
        Vec::new()
    }
}

// ============ Script runs ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Kanji,
    Hiragana,
    Katakana,
    Latin,
    Space,
    Symbol,
}

fn script_of(c: char) -> Script {
    match c {
        '一'..='龠' | '々' => Script::Kanji,
        'ぁ'..='ん' => Script::Hiragana,
        'ァ'..='ヶ' | 'ー' => Script::Katakana,
        c if c.is_ascii_alphanumeric() || c == '_' => Script::Latin,
        c if c.is_alphanumeric() => Script::Latin,
        c if c.is_whitespace() => Script::Space,
        _ => Script::Symbol,
    }
}

/// Dictionary-free segmenter that cuts text wherever the script changes.
///
/// Kanji, katakana, and Latin runs become nouns (so compounds like `学習`
/// or `retry` are matchable lemmas); hiragana runs become particles.
/// Whitespace is dropped.
pub struct ScriptRunTokenizer;

impl Tokenizer for ScriptRunTokenizer {
    fn name(&self) -> &str {
        "script"
    }

    fn tokenize(&self, text: &str) -> Vec<MorphToken> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut current_script: Option<Script> = None;

        for c in text.chars() {
            let script = script_of(c);
            if current_script != Some(script) {
                if let Some(prev) = current_script {
                    push_run(&mut tokens, &current, prev);
                }
                current.clear();
                current_script = Some(script);
            }
            current.push(c);
        }
        if let Some(prev) = current_script {
            push_run(&mut tokens, &current, prev);
        }
        tokens
    }
}

fn push_run(tokens: &mut Vec<MorphToken>, run: &str, script: Script) {
    let pos = match script {
        Script::Space => return,
        Script::Kanji | Script::Katakana | Script::Latin => PartOfSpeech::Noun,
        Script::Hiragana => PartOfSpeech::Particle,
        Script::Symbol => PartOfSpeech::Symbol,
    };
    tokens.push(MorphToken {
        surface: run.to_string(),
        lemma: run.to_lowercase(),
        pos,
    });
}

/// Create a tokenizer for the configured provider name.
pub fn create_tokenizer(provider: &str) -> Result<Box<dyn Tokenizer>> {
    match provider {
        "disabled" => Ok(Box::new(DisabledTokenizer)),
        "script" => Ok(Box::new(ScriptRunTokenizer)),
        other => bail!(
            "Unknown tokenizer provider: '{}'. Must be disabled or script.",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_empty() {
        assert!(DisabledTokenizer.tokenize("今日は晴れ").is_empty());
    }

    #[test]
    fn test_script_runs() {
        let tokens = ScriptRunTokenizer.tokenize("retry 戦略を学習した");
        let surfaces: Vec<&str> = tokens.iter().map(|t| t.surface.as_str()).collect();
        assert_eq!(surfaces, vec!["retry", "戦略", "を", "学習", "した"]);
        assert_eq!(tokens[0].pos, PartOfSpeech::Noun);
        assert_eq!(tokens[2].pos, PartOfSpeech::Particle);
    }

    #[test]
    fn test_latin_lemma_lowercased() {
        let tokens = ScriptRunTokenizer.tokenize("Learned Rust");
        assert_eq!(tokens[0].lemma, "learned");
        assert_eq!(tokens[1].normalized_lemma(), "rust");
    }

    #[test]
    fn test_create_tokenizer() {
        assert_eq!(create_tokenizer("script").unwrap().name(), "script");
        assert!(create_tokenizer("mecab").is_err());
    }
}
