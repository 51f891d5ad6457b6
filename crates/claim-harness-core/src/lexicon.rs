//! Predicate lexicon for the rule extractor.
//!
//! A [`Lexicon`] holds three immutable tables:
//!
//! | Table | Used for | Order matters |
//! |-------|----------|---------------|
//! | sentence hints | regex → predicate, first match wins | yes |
//! | trigger lemmas | predicate → lemma set, first intersecting set wins | yes |
//! | stop lemmas | dropped from objects and dedup keys | no |
//!
//! The built-in table ([`LexiconTable::builtin`]) covers Japanese and
//! English journal phrasing. A table can also be deserialized from TOML and
//! compiled with [`Lexicon::from_table`].

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LexiconError {
    #[error("invalid hint pattern for '{predicate}': {source}")]
    InvalidPattern {
        predicate: String,
        #[source]
        source: regex::Error,
    },
    #[error("lexicon entry has an empty predicate")]
    EmptyPredicate,
}

/// One sentence hint: a case-insensitive regex and the predicate it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintEntry {
    pub predicate: String,
    pub pattern: String,
}

/// Trigger lemmas for one predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LemmaEntry {
    pub predicate: String,
    pub lemmas: Vec<String>,
}

/// Serializable form of a lexicon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexiconTable {
    #[serde(default)]
    pub hints: Vec<HintEntry>,
    #[serde(default)]
    pub lemmas: Vec<LemmaEntry>,
    #[serde(default)]
    pub stop_lemmas: Vec<String>,
}

fn hint(predicate: &str, pattern: &str) -> HintEntry {
    HintEntry {
        predicate: predicate.to_string(),
        pattern: pattern.to_string(),
    }
}

fn lemmas(predicate: &str, words: &[&str]) -> LemmaEntry {
    LemmaEntry {
        predicate: predicate.to_string(),
        lemmas: words.iter().map(|w| w.to_string()).collect(),
    }
}

impl LexiconTable {
    /// The built-in Japanese/English table.
    pub fn builtin() -> Self {
        Self {
            hints: vec![
                hint("learned", r"(学ん|学び|学習|learned?|気づ|わかった|理解|insight)"),
                hint("decided", r"(決め|決定|decid|choose|選ん)"),
                hint("blocked_by", r"(課題|問題|詰ま|blocked|障害|困|難し)"),
                hint("improved", r"(改善|improve|良くな|効率化|最適|optimi)"),
                hint("next_action", r"(次|next|todo|やる|やりたい|will|明日|次回|予定)"),
                hint("tested", r"(試し|試した|試験|実験|実施|検証|experiment|test)"),
                hint(
                    "felt",
                    r"(感じ|feel|疲|つら|嬉|楽しい|不安|安心|緊張|落ち込|モヤモヤ)",
                ),
            ],
            lemmas: vec![
                lemmas(
                    "learned",
                    &["学ぶ", "学び", "学ん", "学習", "理解", "気づく", "learn", "insight"],
                ),
                lemmas("decided", &["決める", "決定", "選ぶ", "choose", "decide"]),
                lemmas(
                    "blocked_by",
                    &["課題", "問題", "詰まる", "障害", "困る", "blocked", "不足"],
                ),
                lemmas(
                    "improved",
                    &["改善", "効率化", "最適化", "最適", "良くなる", "improve", "optimize"],
                ),
                lemmas(
                    "next_action",
                    &["次", "todo", "やる", "対応", "next", "will", "明日", "次回", "予定"],
                ),
                lemmas(
                    "tested",
                    &["試す", "試験", "実験", "検証", "テスト", "実施", "experiment", "test"],
                ),
                lemmas(
                    "felt",
                    &[
                        "感じる", "疲れる", "つらい", "嬉しい", "楽しい", "不安", "安心", "緊張",
                        "落ち込む", "モヤモヤ", "feel",
                    ],
                ),
            ],
            stop_lemmas: [
                "する", "なる", "ある", "いる", "こと", "もの", "これ", "それ", "ため", "です",
                "ます", "todo", "next",
            ]
            .iter()
            .map(|w| w.to_string())
            .collect(),
        }
    }
}

struct HintRule {
    predicate: String,
    pattern: Regex,
}

/// Compiled, immutable lexicon.
pub struct Lexicon {
    hints: Vec<HintRule>,
    lemma_sets: Vec<(String, HashSet<String>)>,
    stop_lemmas: HashSet<String>,
}

impl Lexicon {
    /// Compile a table. Patterns are matched case-insensitively.
    pub fn from_table(table: &LexiconTable) -> Result<Self, LexiconError> {
        let mut hints = Vec::with_capacity(table.hints.len());
        for entry in &table.hints {
            if entry.predicate.trim().is_empty() {
                return Err(LexiconError::EmptyPredicate);
            }
            let pattern = RegexBuilder::new(&entry.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| LexiconError::InvalidPattern {
                    predicate: entry.predicate.clone(),
                    source,
                })?;
            hints.push(HintRule {
                predicate: entry.predicate.clone(),
                pattern,
            });
        }

        let mut lemma_sets = Vec::with_capacity(table.lemmas.len());
        for entry in &table.lemmas {
            if entry.predicate.trim().is_empty() {
                return Err(LexiconError::EmptyPredicate);
            }
            let set = entry.lemmas.iter().map(|l| l.to_lowercase()).collect();
            lemma_sets.push((entry.predicate.clone(), set));
        }

        Ok(Self {
            hints,
            lemma_sets,
            stop_lemmas: table.stop_lemmas.iter().map(|l| l.to_lowercase()).collect(),
        })
    }

    /// First sentence hint matching `sentence`.
    pub fn match_hint(&self, sentence: &str) -> Option<&str> {
        self.hints
            .iter()
            .find(|rule| rule.pattern.is_match(sentence))
            .map(|rule| rule.predicate.as_str())
    }

    /// First predicate whose trigger set intersects `lemmas`.
    pub fn match_lemmas(&self, lemmas: &HashSet<String>) -> Option<&str> {
        self.lemma_sets
            .iter()
            .find(|(_, set)| !set.is_disjoint(lemmas))
            .map(|(predicate, _)| predicate.as_str())
    }

    /// Trigger lemmas for a predicate, if it has any.
    pub fn triggers(&self, predicate: &str) -> Option<&HashSet<String>> {
        self.lemma_sets
            .iter()
            .find(|(p, _)| p == predicate)
            .map(|(_, set)| set)
    }

    pub fn is_stop(&self, lemma: &str) -> bool {
        self.stop_lemmas.contains(lemma)
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::from_table(&LexiconTable::builtin()).expect("built-in lexicon compiles")
    }
}
