//! Rule-based fact extraction.
//!
//! Derives subject/predicate/object facts from notes, tasks, and documents
//! with no external model. Works with or without tokenizer output; when the
//! tokenizer yields nothing, objects fall back to whole sentences.
//!
//! # Confidence
//!
//! | Source | Confidence |
//! |--------|------------|
//! | sentence hint regex | 0.82 |
//! | trigger-lemma intersection | 0.79 |
//! | default (`mentions`) | 0.72 |
//! | bullet or next-action line in a task | at least 0.84 |
//! | note/task metadata | 0.90 – 0.99 |

use std::collections::HashSet;

use serde_json::json;

use crate::contract::{
    MAX_EXCERPT_CHARS as MAX_EVIDENCE_CHARS, MAX_OBJECT_CHARS, MAX_PREDICATE_CHARS,
    MAX_SUBJECT_CHARS,
};
use crate::gate::dedupe_facts;
use crate::lexicon::Lexicon;
use crate::models::{
    Claim, ClaimBundle, Document, Fact, MeRole, Modality, NoteRecord, ObjectType, Predicate,
    TaskRecord,
};
use crate::text::{clamp_text, collapse_whitespace};
use crate::tokenizer::{MorphToken, PartOfSpeech, Tokenizer};

pub const EXTRACTOR_VERSION: &str = "rules-v1";

const HINT_CONFIDENCE: f64 = 0.82;
const LEMMA_CONFIDENCE: f64 = 0.79;
const DEFAULT_CONFIDENCE: f64 = 0.72;
const TASK_ACTION_CONFIDENCE: f64 = 0.84;

const MIN_SENTENCE_CHARS: usize = 4;
const MAX_SENTENCE_CHARS: usize = 240;
const SHORT_SENTENCE_CHARS: usize = 10;
const WINDOW_BEFORE: usize = 4;
const WINDOW_AFTER: usize = 4;

const SENTENCE_EVIDENCE_CHARS: usize = 350;

static_regex!(sentence_split_re, r"[。.!?！？\n]+");
static_regex!(bullet_re, r"^\s*(?:[-*・]|[0-9]+[.)])\s+");
static_regex!(
    date_candidate_re,
    r"(?:\d{4}[-/年]\d{1,2}[-/月]\d{1,2}日?|今日|昨日|明日)"
);
static_regex!(number_candidate_re, r"[-+]?\d+(?:\.\d+)?");
static_regex!(whole_number_re, r"^[-+]?\d+(?:\.\d+)?$");

/// Infer a fact's object type, with a JSON payload for numbers.
pub fn infer_object_type(predicate: &str, object: &str) -> (ObjectType, Option<serde_json::Value>) {
    if matches!(
        predicate,
        "journal_date" | "due_at" | "scheduled_at" | "completed_at"
    ) || date_candidate_re().is_match(object)
    {
        return (ObjectType::Date, None);
    }

    let trimmed = object.trim();
    let score_predicate = matches!(predicate, "mood_score" | "energy_score" | "priority");
    if score_predicate || whole_number_re().is_match(trimmed) {
        let value = number_candidate_re()
            .find(trimmed)
            .and_then(|m| m.as_str().parse::<f64>().ok());
        return (ObjectType::Number, value.map(|v| json!({ "value": v })));
    }

    (ObjectType::Text, None)
}

/// Validate a fact before persistence. Returns every problem found.
pub fn validate_fact(fact: &Fact) -> Vec<String> {
    let mut errors = Vec::new();
    if !(0.0..=1.0).contains(&fact.confidence) {
        errors.push(format!("confidence out of range: {}", fact.confidence));
    }
    if fact.subject.trim().is_empty() {
        errors.push("subject is empty".to_string());
    }
    if fact.predicate.trim().is_empty() {
        errors.push("predicate is empty".to_string());
    }
    if fact.object_text.trim().is_empty() {
        errors.push("object_text is empty".to_string());
    }
    if fact.subject.chars().count() > MAX_SUBJECT_CHARS {
        errors.push("subject too long".to_string());
    }
    if fact.predicate.chars().count() > MAX_PREDICATE_CHARS {
        errors.push("predicate too long".to_string());
    }
    if fact.object_text.chars().count() > MAX_OBJECT_CHARS {
        errors.push("object_text too long".to_string());
    }
    if let Some(evidence) = &fact.evidence_excerpt {
        if evidence.chars().count() > MAX_EVIDENCE_CHARS {
            errors.push("evidence_excerpt too long".to_string());
        }
    }
    errors
}

fn meta_fact(
    subject: &str,
    predicate: &str,
    object: &str,
    object_type: ObjectType,
    confidence: f64,
    occurred_at: Option<&str>,
) -> Fact {
    let object_json = match object_type {
        ObjectType::Number => object.trim().parse::<f64>().ok().map(|v| json!({ "value": v })),
        _ => None,
    };
    Fact {
        subject: subject.to_string(),
        predicate: predicate.to_string(),
        object_text: clamp_text(object, MAX_OBJECT_CHARS),
        object_type,
        object_json,
        evidence_excerpt: None,
        occurred_at: occurred_at.map(str::to_string),
        confidence,
    }
}

/// Rule-based extractor over an injected lexicon and tokenizer.
pub struct RuleExtractor<'a> {
    lexicon: &'a Lexicon,
    tokenizer: &'a dyn Tokenizer,
    max_facts: usize,
}

impl<'a> RuleExtractor<'a> {
    pub fn new(lexicon: &'a Lexicon, tokenizer: &'a dyn Tokenizer, max_facts: usize) -> Self {
        Self {
            lexicon,
            tokenizer,
            max_facts,
        }
    }

    /// Split on sentence punctuation and newlines, keeping 4–240 character
    /// sentences. Very short single-token fragments are dropped.
    pub fn split_sentences(&self, text: &str) -> Vec<String> {
        sentence_split_re()
            .split(text)
            .map(collapse_whitespace)
            .filter(|s| {
                let len = s.chars().count();
                if !(MIN_SENTENCE_CHARS..=MAX_SENTENCE_CHARS).contains(&len) {
                    return false;
                }
                let tokens = self.tokenizer.tokenize(s);
                !(!tokens.is_empty() && tokens.len() <= 1 && len < SHORT_SENTENCE_CHARS)
            })
            .collect()
    }

    /// Pick a predicate for a sentence: hint regex, then trigger lemmas,
    /// then `mentions`.
    pub fn detect_predicate(&self, sentence: &str, tokens: &[MorphToken]) -> (String, f64) {
        if let Some(predicate) = self.lexicon.match_hint(sentence) {
            return (predicate.to_string(), HINT_CONFIDENCE);
        }
        let lemmas: HashSet<String> = tokens
            .iter()
            .map(|t| t.normalized_lemma())
            .filter(|l| !l.is_empty())
            .collect();
        if let Some(predicate) = self.lexicon.match_lemmas(&lemmas) {
            return (predicate.to_string(), LEMMA_CONFIDENCE);
        }
        ("mentions".to_string(), DEFAULT_CONFIDENCE)
    }

    /// Content words around the predicate's trigger token.
    pub fn extract_object(&self, sentence: &str, predicate: &str, tokens: &[MorphToken]) -> String {
        if tokens.is_empty() {
            return clamp_text(sentence, MAX_OBJECT_CHARS);
        }

        let trigger_idx = self.lexicon.triggers(predicate).and_then(|triggers| {
            tokens
                .iter()
                .position(|t| triggers.contains(&t.normalized_lemma()))
        });
        let window = match trigger_idx {
            Some(idx) => {
                let start = idx.saturating_sub(WINDOW_BEFORE);
                let end = (idx + WINDOW_AFTER + 1).min(tokens.len());
                &tokens[start..end]
            }
            None => tokens,
        };

        let mut object: String = window
            .iter()
            .filter(|t| {
                let lemma = t.normalized_lemma();
                !lemma.is_empty() && !self.lexicon.is_stop(&lemma) && t.pos.is_content()
            })
            .map(|t| t.surface.as_str())
            .collect();

        if object.is_empty() {
            object = tokens
                .iter()
                .filter(|t| t.pos == PartOfSpeech::Noun && !self.lexicon.is_stop(&t.normalized_lemma()))
                .map(|t| t.surface.as_str())
                .collect();
        }

        let object = object.trim();
        if object.chars().count() < 2 {
            return clamp_text(sentence, MAX_OBJECT_CHARS);
        }
        clamp_text(object, MAX_OBJECT_CHARS)
    }

    fn sentence_fact(
        &self,
        subject: &str,
        sentence: &str,
        occurred_at: Option<&str>,
        task_line: Option<&str>,
    ) -> Fact {
        let tokens = self.tokenizer.tokenize(sentence);
        let (mut predicate, mut confidence) = self.detect_predicate(sentence, &tokens);
        let is_action = task_line
            .map(|line| bullet_re().is_match(line) || predicate == "next_action")
            .unwrap_or(false);
        if is_action {
            predicate = "next_action".to_string();
            confidence = confidence.max(TASK_ACTION_CONFIDENCE);
        }
        let object_text = self.extract_object(sentence, &predicate, &tokens);
        let (object_type, object_json) = infer_object_type(&predicate, &object_text);
        Fact {
            subject: subject.to_string(),
            predicate,
            object_text,
            object_type,
            object_json,
            evidence_excerpt: Some(clamp_text(sentence, SENTENCE_EVIDENCE_CHARS)),
            occurred_at: occurred_at.map(str::to_string),
            confidence,
        }
    }

    /// Metadata facts followed by one fact per sentence, deduped and capped.
    pub fn facts_from_note(&self, note: &NoteRecord) -> Vec<Fact> {
        let occurred_at = note.occurred_at.as_deref();
        let mut facts = Vec::new();

        if let Some(summary) = note.summary.as_deref().filter(|s| !s.is_empty()) {
            facts.push(meta_fact(
                &format!("note:{}", note.id),
                "summary",
                summary,
                ObjectType::Text,
                0.90,
                occurred_at,
            ));
        }
        if let Some(url) = note.source_url.as_deref().filter(|s| !s.is_empty()) {
            facts.push(meta_fact("me", "captured_source", url, ObjectType::Text, 0.96, occurred_at));
        }
        if note.note_type == "journal" {
            if let Some(date) = note.journal_date.as_deref().filter(|s| !s.is_empty()) {
                facts.push(meta_fact("me", "journal_date", date, ObjectType::Date, 0.97, occurred_at));
            }
        }
        for (predicate, score) in [("mood_score", note.mood_score), ("energy_score", note.energy_score)] {
            if let Some(score) = score {
                facts.push(meta_fact(
                    "me",
                    predicate,
                    &score.to_string(),
                    ObjectType::Number,
                    0.97,
                    occurred_at,
                ));
            }
        }

        let text = [
            note.title.as_deref().unwrap_or(""),
            note.summary.as_deref().unwrap_or(""),
            note.body.as_str(),
        ]
        .join("\n");
        for sentence in self.split_sentences(text.trim()) {
            if facts.len() >= self.max_facts {
                break;
            }
            facts.push(self.sentence_fact("me", &sentence, occurred_at, None));
        }

        dedupe_facts(facts, self.tokenizer, self.lexicon, self.max_facts)
    }

    /// Task metadata facts followed by action facts from title and details.
    pub fn facts_from_task(&self, task: &TaskRecord) -> Vec<Fact> {
        let subject = format!("task:{}", task.id);
        let mut facts = vec![
            meta_fact(&subject, "status", &task.status, ObjectType::Text, 0.98, None),
            meta_fact(
                &subject,
                "priority",
                &task.priority.to_string(),
                ObjectType::Number,
                0.98,
                None,
            ),
        ];

        let dated = [
            ("due_at", task.due_at.as_deref(), 0.98),
            ("scheduled_at", task.scheduled_at.as_deref(), 0.96),
            ("completed_at", task.completed_at.as_deref(), 0.99),
        ];
        for (predicate, value, confidence) in dated {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                facts.push(meta_fact(
                    &subject,
                    predicate,
                    value,
                    ObjectType::Date,
                    confidence,
                    Some(value),
                ));
            }
        }
        if let Some(note_id) = task.source_note_id.as_deref().filter(|s| !s.is_empty()) {
            facts.push(meta_fact(
                &subject,
                "derived_from_note",
                note_id,
                ObjectType::Text,
                0.95,
                None,
            ));
        }

        // Bullet markers are judged per line; "1." would not survive sentence splitting.
        let text = [task.title.as_str(), task.details.as_deref().unwrap_or("")].join("\n");
        for line in text.trim().lines() {
            for sentence in self.split_sentences(line) {
                if facts.len() >= self.max_facts {
                    break;
                }
                facts.push(self.sentence_fact(&subject, &sentence, None, Some(line)));
            }
        }

        dedupe_facts(facts, self.tokenizer, self.lexicon, self.max_facts)
    }

    /// A document is extracted like an untyped note whose subject is `me`.
    pub fn facts_from_document(&self, doc: &Document) -> Vec<Fact> {
        let note = NoteRecord {
            id: doc.id.clone(),
            note_type: doc.declared_type.clone(),
            body: doc.raw_text.clone(),
            occurred_at: doc.occurred_at.clone(),
            ..Default::default()
        };
        self.facts_from_note(&note)
    }

    /// Claims for a document, derived from its sentence facts.
    pub fn claims_from_document(&self, doc: &Document) -> ClaimBundle {
        let claims = self
            .facts_from_document(doc)
            .iter()
            .filter_map(fact_to_claim)
            .collect();
        ClaimBundle {
            claims,
            ..Default::default()
        }
    }
}

/// Map a sentence fact onto the claim vocabulary. Metadata facts (no
/// evidence) have no claim form.
pub fn fact_to_claim(fact: &Fact) -> Option<Claim> {
    let evidence = fact.evidence_excerpt.as_deref()?;
    let (predicate, modality, role) = match fact.predicate.as_str() {
        "learned" => (Predicate::Learned, Modality::Fact, MeRole::Experiencer),
        "decided" => (Predicate::Decided, Modality::Fact, MeRole::Actor),
        "felt" => (Predicate::Felt, Modality::Feeling, MeRole::Experiencer),
        "next_action" => (Predicate::Planned, Modality::Plan, MeRole::Actor),
        "tested" | "improved" => (Predicate::Did, Modality::Fact, MeRole::Actor),
        "blocked_by" => (Predicate::WasAffectedBy, Modality::Fact, MeRole::Experiencer),
        _ => (Predicate::Mentions, Modality::Fact, MeRole::Observer),
    };
    let mut claim = Claim::new(fact.subject.clone(), predicate, fact.object_text.clone())
        .with_evidence(evidence);
    claim.modality = modality;
    claim.me_role = if claim.is_me() { role } else { MeRole::Unassigned };
    claim.certainty = fact.confidence;
    claim.time_start_utc = fact.occurred_at.clone();
    Some(claim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{DisabledTokenizer, ScriptRunTokenizer};

    fn extractor<'a>(lex: &'a Lexicon, tok: &'a dyn Tokenizer) -> RuleExtractor<'a> {
        RuleExtractor::new(lex, tok, 12)
    }

    #[test]
    fn test_split_sentences() {
        let lex = Lexicon::default();
        let ex = extractor(&lex, &DisabledTokenizer);
        let out = ex.split_sentences("今日は晴れ。明日は  雨らしい!\nok\nテストを実施した");
        assert_eq!(out, vec!["今日は晴れ", "明日は 雨らしい", "テストを実施した"]);
    }

    #[test]
    fn test_detect_predicate_ordering() {
        let lex = Lexicon::default();
        let ex = extractor(&lex, &DisabledTokenizer);
        assert_eq!(
            ex.detect_predicate("障害対応を通して学習した内容を整理した", &[]),
            ("learned".to_string(), 0.82)
        );
        assert_eq!(
            ex.detect_predicate("TODO: 次回は要件を確認する", &[]),
            ("next_action".to_string(), 0.82)
        );
        assert_eq!(ex.detect_predicate("晴れていた", &[]), ("mentions".to_string(), 0.72));
    }

    #[test]
    fn test_detect_predicate_by_lemma() {
        let lex = Lexicon::default();
        let ex = extractor(&lex, &ScriptRunTokenizer);
        let tokens = ScriptRunTokenizer.tokenize("コードの不足がわかる");
        // "不足" is a blocked_by trigger lemma but matches no hint regex.
        assert_eq!(
            ex.detect_predicate("コードの不足がわかる", &tokens),
            ("blocked_by".to_string(), 0.79)
        );
    }

    #[test]
    fn test_object_without_tokens_is_sentence() {
        let lex = Lexicon::default();
        let ex = extractor(&lex, &DisabledTokenizer);
        assert_eq!(ex.extract_object("雨の日の 散歩", "mentions", &[]), "雨の日の 散歩");
    }

    #[test]
    fn test_object_window_around_trigger() {
        let lex = Lexicon::default();
        let ex = extractor(&lex, &ScriptRunTokenizer);
        let sentence = "retry戦略を学習した";
        let tokens = ScriptRunTokenizer.tokenize(sentence);
        assert_eq!(ex.extract_object(sentence, "learned", &tokens), "retry戦略学習");
    }

    #[test]
    fn test_short_object_falls_back_to_sentence() {
        let lex = Lexicon::default();
        let ex = extractor(&lex, &ScriptRunTokenizer);
        let sentence = "雨がふるらしい";
        let tokens = ScriptRunTokenizer.tokenize(sentence);
        assert_eq!(ex.extract_object(sentence, "mentions", &tokens), sentence);
    }

    #[test]
    fn test_infer_object_type() {
        assert_eq!(infer_object_type("due_at", "soon").0, ObjectType::Date);
        assert_eq!(infer_object_type("mentions", "2024-05-01に出発").0, ObjectType::Date);
        assert_eq!(infer_object_type("mentions", "昨日の件").0, ObjectType::Date);
        assert_eq!(
            infer_object_type("mentions", " 42 "),
            (ObjectType::Number, Some(json!({ "value": 42.0 })))
        );
        assert_eq!(
            infer_object_type("priority", "p3"),
            (ObjectType::Number, Some(json!({ "value": 3.0 })))
        );
        assert_eq!(infer_object_type("mentions", "42 apples").0, ObjectType::Text);
    }

    #[test]
    fn test_note_meta_facts() {
        let lex = Lexicon::default();
        let ex = extractor(&lex, &DisabledTokenizer);
        let note = NoteRecord {
            id: "n1".to_string(),
            note_type: "journal".to_string(),
            summary: Some("まとめ".to_string()),
            body: "障害対応を通して学習した内容を整理した".to_string(),
            journal_date: Some("2024-05-01".to_string()),
            mood_score: Some(4.0),
            occurred_at: Some("2024-05-01T09:00:00Z".to_string()),
            ..Default::default()
        };
        let facts = ex.facts_from_note(&note);
        let predicates: Vec<&str> = facts.iter().map(|f| f.predicate.as_str()).collect();
        assert_eq!(predicates, vec!["summary", "journal_date", "mood_score", "learned"]);
        assert_eq!(facts[0].subject, "note:n1");
        assert_eq!(facts[2].object_json, Some(json!({ "value": 4.0 })));
        assert_eq!(facts[3].subject, "me");
        assert!(facts[3].evidence_excerpt.is_some());
    }

    #[test]
    fn test_task_bullets_become_next_action() {
        let lex = Lexicon::default();
        let ex = extractor(&lex, &DisabledTokenizer);
        let task = TaskRecord {
            id: "t1".to_string(),
            title: "リリース準備".to_string(),
            details: Some("- 変更履歴をまとめる\nTODO: 次回は要件を確認する".to_string()),
            status: "open".to_string(),
            priority: 2,
            due_at: Some("2024-06-01".to_string()),
            ..Default::default()
        };
        let facts = ex.facts_from_task(&task);
        let actions: Vec<&Fact> = facts.iter().filter(|f| f.predicate == "next_action").collect();
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|f| f.confidence >= 0.84));
        assert!(facts.iter().any(|f| f.predicate == "due_at" && f.object_type == ObjectType::Date));
        assert!(facts.iter().all(|f| f.subject == "task:t1"));
    }

    #[test]
    fn test_validate_fact() {
        let mut fact = meta_fact("me", "summary", "ok", ObjectType::Text, 0.9, None);
        assert!(validate_fact(&fact).is_empty());
        fact.confidence = 1.5;
        fact.object_text = " ".to_string();
        assert_eq!(validate_fact(&fact).len(), 2);
    }

    #[test]
    fn test_document_claims() {
        let lex = Lexicon::default();
        let ex = extractor(&lex, &DisabledTokenizer);
        let doc = Document {
            id: "d1".to_string(),
            entry_id: "e1".to_string(),
            raw_text: "TODO: 次回は要件を確認する".to_string(),
            declared_type: "memo".to_string(),
            occurred_at: Some("2024-05-01T09:00:00Z".to_string()),
            pii_score: 0.0,
            redaction_state: crate::models::RedactionState::Clear,
        };
        let bundle = ex.claims_from_document(&doc);
        assert_eq!(bundle.claims.len(), 1);
        let claim = &bundle.claims[0];
        assert_eq!(claim.predicate, Predicate::Planned);
        assert_eq!(claim.modality, Modality::Plan);
        assert_eq!(claim.me_role, MeRole::Actor);
        assert_eq!(claim.evidence_spans[0].excerpt, "TODO: 次回は要件を確認する");
    }
}
