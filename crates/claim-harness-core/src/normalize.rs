//! Me-centric claim normalization.
//!
//! Rewrites a parsed [`ClaimBundle`] so that the authoring user appears as
//! the single subject `me`, every claim has a canonical predicate and at
//! least one evidence span, and causal structure the model left implicit is
//! made explicit.
//!
//! | Stage | Effect |
//! |-------|--------|
//! | subject | first-person forms → `me`; `me` + role `none` → `experiencer` |
//! | predicate | off-vocabulary predicates remapped by alias pattern, else `mentions` |
//! | evidence | claims without spans get one from the source text |
//! | restoration | translated objects restored from a source-script excerpt |
//! | fallback | an empty set gets one `me experienced <source>` claim |
//! | completion | elliptical state changes inherit the last named topic |
//! | augmentation | uncovered action clauses become `did` / `planned` claims |
//! | causality | decisions get a `caused_by` link to an event |
//!
//! Normalization never drops a claim, so input links only need a range check.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::contract::{MAX_OBJECT_CHARS, MAX_SUBJECT_CHARS};
use crate::models::{
    Claim, ClaimBundle, ClaimLink, EvidenceSpan, MeRole, Modality, Predicate, RelationType,
};
use crate::text::{char_bigrams, coverage_key, has_cjk, truncate_chars};

const ME: &str = "me";
const MAX_FALLBACK_EXCERPT_CHARS: usize = 200;
const MAX_CONTEXT_CHARS: usize = 180;
const MIN_ACTION_CLAUSE_CHARS: usize = 4;

const FALLBACK_CERTAINTY: f64 = 0.5;
const PLAN_CLAUSE_CERTAINTY: f64 = 0.72;
const ACTION_CLAUSE_CERTAINTY: f64 = 0.68;
const CONTEXT_CERTAINTY: f64 = 0.7;
const EVENT_LINK_CONFIDENCE: f64 = 0.75;
const CONTEXT_LINK_CONFIDENCE: f64 = 0.72;

static_regex!(
    me_reference_re,
    r"(?i)^(?:me|i|myself|私|わたし|僕|ぼく|俺|おれ|自分)$"
);
static_regex!(cause_hint_re, r"(?i)(because|due to|ので|から|ため|せいで)");
static_regex!(rain_hint_re, r"(?i)(rain|雨)");
static_regex!(
    temporal_prefix_re,
    r"^(今日|昨日|明日|今朝|今夜|昨夜|先週|今週|来週|先月|今月|来月|月曜(?:日)?|火曜(?:日)?|水曜(?:日)?|木曜(?:日)?|金曜(?:日)?|土曜(?:日)?|日曜(?:日)?)は"
);
static_regex!(
    state_change_re,
    r"(?i)(悪化|改善|回復|低下|上昇|不調|悪く|良く|崩れ|しんど|痛|つら|worsen|worsened|worsening|improv|recover)"
);
static_regex!(
    topic_hint_re,
    r"(?i)(喉(?:の調子)?|のど|体調|熱|咳|頭痛|胃|声|鼻|睡眠|気分|疲労|sore throat|throat|condition|health)"
);
static_regex!(
    topic_before_change_re,
    r"(?P<topic>[^、。]{1,24}?)が(?:悪化|悪く|改善|回復|低下|上昇|不調|痛)"
);
static_regex!(sentence_split_re, r"[。！？]\s*");
static_regex!(clause_split_re, r"[、]\s*");
static_regex!(
    action_hint_re,
    r"(?i)(した|して|行っ|帰宅|作業|トレ|運動|洗濯|寝|指示|出し|やっ|会議|勉強|読書|書い|送っ|連絡|準備|買っ)"
);
static_regex!(
    plan_hint_re,
    r"(?i)(しよう|する予定|つもり|したい|忘れないよう|しなければ|べき|予定|to do|todo)"
);

/// Ordered alias table for off-vocabulary predicates. First match wins.
fn predicate_aliases() -> &'static [(Regex, Predicate)] {
    static TABLE: std::sync::OnceLock<Vec<(Regex, Predicate)>> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"(?i)(went_to|go|visit|行った|行く|向かった|訪れた)", Predicate::WentTo),
            (r"(?i)(was_with|with|一緒|同行|同期と|友達と|同僚と)", Predicate::WasWith),
            (r"(?i)(chose|choice|選んだ|決めた)", Predicate::Chose),
            (r"(?i)(ended|解散|終わった|終了した)", Predicate::Ended),
            (r"(?i)(felt|感じた|気分|emotion)", Predicate::Felt),
            (r"(?i)(learned|学んだ|覚えた)", Predicate::Learned),
            (r"(?i)(planned|予定|つもり)", Predicate::Planned),
            (r"(?i)(requested|頼んだ|依頼)", Predicate::Requested),
            (r"(?i)(affected|影響|左右)", Predicate::WasAffectedBy),
            (r"(?i)(happened|起きた|発生|降った)", Predicate::Happened),
            (r"(?i)(did|した|実施|遊んだ)", Predicate::Did),
            (r"(?i)(decided|判断|決断)", Predicate::Decided),
        ]
        .into_iter()
        .map(|(pattern, predicate)| {
            (
                Regex::new(pattern).expect("static pattern compiles"),
                predicate,
            )
        })
        .collect()
    })
}

/// Tunable thresholds for the heuristic stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Minimum bigram overlap for a clause to count as covered.
    pub coverage_threshold: f64,
    /// Objects at most this long are candidates for topic completion.
    pub completion_max_chars: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.55,
            completion_max_chars: 24,
        }
    }
}

// ============ Per-claim stages ============

/// `me` for empty or first-person subjects, otherwise the subject capped.
pub fn canonical_subject(subject: &str) -> String {
    let value = subject.trim();
    if value.is_empty() || me_reference_re().is_match(value) {
        ME.to_string()
    } else {
        truncate_chars(value, MAX_SUBJECT_CHARS)
    }
}

/// Map a predicate onto the fixed vocabulary.
pub fn canonical_predicate(predicate: &Predicate, object: &str) -> Predicate {
    if predicate.is_canonical() {
        return predicate.clone();
    }
    let candidate = format!("{} {}", predicate.as_str().trim(), object);
    predicate_aliases()
        .iter()
        .find(|(re, _)| re.is_match(&candidate))
        .map(|(_, mapped)| mapped.clone())
        .unwrap_or(Predicate::Mentions)
}

/// Undo a model translation: when the source is in kana/kanji but the object
/// is not, fall back to the first evidence excerpt if it kept the script.
fn restore_source_language(object: String, raw_text: &str, spans: &[EvidenceSpan]) -> String {
    if raw_text.trim().is_empty() || !has_cjk(raw_text) || has_cjk(&object) {
        return object;
    }
    match spans.first().map(|s| s.excerpt.trim()) {
        Some(excerpt) if !excerpt.is_empty() && has_cjk(excerpt) => {
            truncate_chars(excerpt, MAX_OBJECT_CHARS)
        }
        _ => object,
    }
}

fn ensure_evidence(claim: &mut Claim, raw_text: &str) {
    if !claim.evidence_spans.is_empty() {
        return;
    }
    let mut excerpt = truncate_chars(raw_text.trim(), MAX_FALLBACK_EXCERPT_CHARS);
    if excerpt.is_empty() {
        excerpt = truncate_chars(&claim.object_text_canonical, MAX_FALLBACK_EXCERPT_CHARS);
    }
    if excerpt.is_empty() {
        excerpt = "evidence unavailable".to_string();
    }
    claim.evidence_spans.push(EvidenceSpan::excerpt(excerpt));
}

fn normalize_claim(mut claim: Claim, raw_text: &str, occurred_at: Option<&str>) -> Claim {
    claim.subject_text = canonical_subject(&claim.subject_text);

    let raw_object = if claim.object_text_raw.is_empty() {
        &claim.object_text_canonical
    } else {
        &claim.object_text_raw
    };
    let raw_object = truncate_chars(raw_object, MAX_OBJECT_CHARS);
    claim.predicate = canonical_predicate(&claim.predicate, &raw_object);

    let canonical = if claim.object_text_canonical.is_empty() {
        raw_object.clone()
    } else {
        truncate_chars(&claim.object_text_canonical, MAX_OBJECT_CHARS)
    };
    claim.object_text_canonical = restore_source_language(canonical, raw_text, &claim.evidence_spans);
    claim.object_text_raw = raw_object;

    if claim.is_me() && claim.me_role == MeRole::Unassigned {
        claim.me_role = MeRole::Experiencer;
    }
    if claim.time_start_utc.is_none() {
        claim.time_start_utc = occurred_at.map(str::to_string);
    }
    ensure_evidence(&mut claim, raw_text);
    claim
}

fn fallback_claim(raw_text: &str, occurred_at: Option<&str>) -> Claim {
    let snippet = raw_text.trim();
    let (object, excerpt) = if snippet.is_empty() {
        ("entry recorded".to_string(), "no text".to_string())
    } else {
        (
            truncate_chars(snippet, MAX_OBJECT_CHARS),
            truncate_chars(snippet, MAX_FALLBACK_EXCERPT_CHARS),
        )
    };
    let mut claim = Claim::new(ME, Predicate::Experienced, object).with_evidence(excerpt);
    claim.me_role = MeRole::Experiencer;
    claim.certainty = FALLBACK_CERTAINTY;
    claim.time_start_utc = occurred_at.map(str::to_string);
    claim
}

// ============ Context completion ============

fn context_topic(text: &str) -> Option<String> {
    let value = text.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(caps) = topic_before_change_re().captures(value) {
        let topic = caps["topic"].trim();
        if !topic.is_empty() {
            return Some(truncate_chars(topic, 24));
        }
    }
    topic_hint_re().find(value).map(|m| m.as_str().to_string())
}

fn needs_completion(text: &str, max_chars: usize) -> bool {
    let value = text.trim();
    if value.is_empty() || topic_hint_re().is_match(value) || !state_change_re().is_match(value) {
        return false;
    }
    temporal_prefix_re().is_match(value)
        || ["さらに", "急に", "案の定"].iter().any(|p| value.starts_with(p))
        || value.chars().count() <= max_chars
}

/// `案の定今日は悪化` → `今日に悪化`.
fn normalize_time_prefix(text: &str) -> String {
    let value = text.trim();
    let value = value.strip_prefix("案の定").unwrap_or(value).trim();
    temporal_prefix_re().replacen(value, 1, "${1}に").into_owned()
}

/// Carry the last explicitly named topic into elliptical state changes.
fn complete_context(claims: &mut [Claim], max_chars: usize) {
    let mut latest_topic: Option<String> = None;
    for claim in claims.iter_mut() {
        let object = claim.object_text_canonical.trim().to_string();
        if let Some(topic) = context_topic(&object) {
            latest_topic = Some(topic);
            continue;
        }
        if let Some(topic) = &latest_topic {
            if needs_completion(&object, max_chars) && !object.contains(topic.as_str()) {
                let enriched = format!("{}が{}", topic, normalize_time_prefix(&object));
                tracing::debug!(topic = %topic, "completed elliptical claim");
                claim.object_text_canonical = truncate_chars(&enriched, MAX_OBJECT_CHARS);
            }
        }
    }
}

// ============ Action-clause augmentation ============

fn action_clauses(raw_text: &str) -> Vec<String> {
    sentence_split_re()
        .split(raw_text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .flat_map(|sentence| {
            clause_split_re()
                .split(sentence)
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn clause_covered(clause: &str, claims: &[Claim], threshold: f64) -> bool {
    let clause_key = coverage_key(clause);
    if clause_key.is_empty() {
        return true;
    }
    let clause_grams = char_bigrams(&clause_key);
    claims.iter().any(|claim| {
        let key = coverage_key(&claim.object_text_canonical);
        if key.is_empty() {
            return false;
        }
        if key.contains(&clause_key) || clause_key.contains(&key) {
            return true;
        }
        let grams = char_bigrams(&key);
        let overlap = clause_grams.intersection(&grams).count();
        let smaller = clause_grams.len().min(grams.len()).max(1);
        overlap as f64 / smaller as f64 >= threshold
    })
}

fn clause_claim(clause: &str, occurred_at: Option<&str>) -> Claim {
    let is_plan = plan_hint_re().is_match(clause);
    let (predicate, modality, certainty) = if is_plan {
        (Predicate::Planned, Modality::Plan, PLAN_CLAUSE_CERTAINTY)
    } else {
        (Predicate::Did, Modality::Fact, ACTION_CLAUSE_CERTAINTY)
    };
    let mut excerpt = truncate_chars(clause, MAX_FALLBACK_EXCERPT_CHARS);
    if excerpt.is_empty() {
        excerpt = "action clause".to_string();
    }
    let mut claim =
        Claim::new(ME, predicate, truncate_chars(clause, MAX_OBJECT_CHARS)).with_evidence(excerpt);
    claim.me_role = MeRole::Actor;
    claim.modality = modality;
    claim.certainty = certainty;
    claim.time_start_utc = occurred_at.map(str::to_string);
    claim
}

fn augment_action_claims(
    claims: &mut Vec<Claim>,
    raw_text: &str,
    occurred_at: Option<&str>,
    threshold: f64,
) {
    for clause in action_clauses(raw_text) {
        if clause.chars().count() < MIN_ACTION_CLAUSE_CHARS {
            continue;
        }
        if !action_hint_re().is_match(&clause) && !plan_hint_re().is_match(&clause) {
            continue;
        }
        if clause_covered(&clause, claims, threshold) {
            continue;
        }
        tracing::debug!(clause = %clause, "added uncovered action clause");
        claims.push(clause_claim(&clause, occurred_at));
    }
}

// ============ Causal-link synthesis ============

fn link_causes(
    claims: &mut Vec<Claim>,
    links: &mut Vec<ClaimLink>,
    raw_text: &str,
    occurred_at: Option<&str>,
) {
    let decisions: Vec<usize> = claims
        .iter()
        .enumerate()
        .filter(|(_, c)| c.predicate.is_decision())
        .map(|(i, _)| i)
        .collect();
    if decisions.is_empty() {
        return;
    }

    let has_decision_cause = links
        .iter()
        .any(|l| l.relation_type == RelationType::CausedBy && decisions.contains(&l.from_claim_index));
    if !has_decision_cause {
        let cause = claims.iter().enumerate().position(|(i, c)| {
            !decisions.contains(&i)
                && (c.predicate.is_event() || rain_hint_re().is_match(&c.object_text_canonical))
        });
        if let Some(cause) = cause {
            for &from in &decisions {
                links.push(ClaimLink {
                    from_claim_index: from,
                    to_claim_index: cause,
                    relation_type: RelationType::CausedBy,
                    confidence: EVENT_LINK_CONFIDENCE,
                });
            }
        }
    }

    let has_event = claims.iter().any(|c| c.predicate.is_event());
    if !has_event && (rain_hint_re().is_match(raw_text) || cause_hint_re().is_match(raw_text)) {
        let context = if raw_text.is_empty() {
            "context event happened".to_string()
        } else {
            truncate_chars(raw_text, MAX_CONTEXT_CHARS)
        };
        let excerpt = if raw_text.is_empty() {
            "context event".to_string()
        } else {
            context.clone()
        };
        let mut claim = Claim::new("context", Predicate::Happened, context).with_evidence(excerpt);
        claim.certainty = CONTEXT_CERTAINTY;
        claim.time_start_utc = occurred_at.map(str::to_string);
        claims.push(claim);

        let cause = claims.len() - 1;
        for &from in &decisions {
            links.push(ClaimLink {
                from_claim_index: from,
                to_claim_index: cause,
                relation_type: RelationType::CausedBy,
                confidence: CONTEXT_LINK_CONFIDENCE,
            });
        }
    }
}

/// Run every normalization stage over `bundle`.
///
/// The result always holds at least one claim, and every link in it
/// references an existing claim.
pub fn normalize_to_me_centric(
    bundle: ClaimBundle,
    raw_text: &str,
    occurred_at: Option<&str>,
    config: &NormalizerConfig,
) -> ClaimBundle {
    let ClaimBundle {
        claims,
        entities,
        links,
        quality_flags,
    } = bundle;

    let mut claims: Vec<Claim> = claims
        .into_iter()
        .map(|c| normalize_claim(c, raw_text, occurred_at))
        .collect();
    if claims.is_empty() {
        tracing::debug!("no claims survived parsing; adding fallback claim");
        claims.push(fallback_claim(raw_text, occurred_at));
    }
    let known = claims.len();

    complete_context(&mut claims, config.completion_max_chars);
    augment_action_claims(&mut claims, raw_text, occurred_at, config.coverage_threshold);

    let mut links: Vec<ClaimLink> = links
        .into_iter()
        .filter(|l| l.from_claim_index < known && l.to_claim_index < known)
        .collect();
    link_causes(&mut claims, &mut links, raw_text, occurred_at);

    ClaimBundle {
        claims,
        entities,
        links,
        quality_flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ODAIBA: &str = "今日お台場で同期と遊んだら雨降ってきて即解散になった";

    fn normalize(claims: Vec<Claim>, raw_text: &str) -> ClaimBundle {
        let bundle = ClaimBundle {
            claims,
            ..Default::default()
        };
        normalize_to_me_centric(
            bundle,
            raw_text,
            Some("2026-03-01T09:00:00Z"),
            &NormalizerConfig::default(),
        )
    }

    #[test]
    fn test_causal_link_from_decision() {
        let out = normalize(
            vec![
                Claim::new("me", Predicate::Did, "同期とお台場で遊んだ"),
                Claim::new("weather", Predicate::Happened, "雨が降った"),
                Claim::new("me", Predicate::Ended, "即解散した"),
            ],
            ODAIBA,
        );
        assert_eq!(out.claims.len(), 3);
        let ended = out
            .claims
            .iter()
            .position(|c| c.predicate == Predicate::Ended)
            .unwrap();
        assert!(out
            .links
            .iter()
            .any(|l| l.from_claim_index == ended && l.relation_type == RelationType::CausedBy));
        assert!(out.links_in_range());
        assert!(out.claims.iter().all(|c| !c.evidence_spans.is_empty()));
    }

    #[test]
    fn test_context_claim_when_no_event() {
        let out = normalize(
            vec![Claim::new("私", Predicate::Ended, "即解散した")],
            "雨のため即解散した",
        );
        assert_eq!(out.claims[0].subject_text, "me");
        assert_eq!(out.claims[0].me_role, MeRole::Experiencer);
        let context = out.claims.iter().position(|c| c.subject_text == "context").unwrap();
        assert_eq!(out.claims[context].predicate, Predicate::Happened);
        assert!(out.links.iter().any(|l| l.to_claim_index == context
            && (l.confidence - CONTEXT_LINK_CONFIDENCE).abs() < 1e-9));
    }

    #[test]
    fn test_non_me_claim_retained() {
        let out = normalize(
            vec![Claim::new("weather", Predicate::Happened, "強い雨が降った")],
            "強い雨が降った",
        );
        assert_eq!(out.claims.len(), 1);
        assert_eq!(out.claims[0].subject_text, "weather");
    }

    #[test]
    fn test_fallback_when_empty() {
        let out = normalize(Vec::new(), "なんとなく一日が過ぎた");
        assert_eq!(out.claims.len(), 1);
        let claim = &out.claims[0];
        assert_eq!(claim.subject_text, "me");
        assert_eq!(claim.predicate, Predicate::Experienced);
        assert_eq!(claim.object_text_canonical, "なんとなく一日が過ぎた");
        assert_eq!(claim.time_start_utc.as_deref(), Some("2026-03-01T09:00:00Z"));
    }

    #[test]
    fn test_predicate_alias() {
        let out = normalize(
            vec![Claim::new("me", Predicate::parse("went"), "渋谷に行った")],
            "渋谷に行った",
        );
        assert_eq!(out.claims[0].predicate, Predicate::WentTo);

        let unknown = canonical_predicate(&Predicate::parse("pondered"), "???");
        assert_eq!(unknown, Predicate::Mentions);
    }

    #[test]
    fn test_translated_object_restored() {
        let claim = Claim::new("me", Predicate::Did, "did laundry").with_evidence("洗濯した");
        let out = normalize(vec![claim], "洗濯した");
        assert_eq!(out.claims[0].object_text_canonical, "洗濯した");
        assert_eq!(out.claims[0].object_text_raw, "did laundry");
    }

    #[test]
    fn test_context_completion() {
        let out = normalize(
            vec![
                Claim::new("me", Predicate::Experienced, "喉が痛い"),
                Claim::new("me", Predicate::Experienced, "案の定今日は悪化した"),
            ],
            "喉が痛い。案の定今日は悪化した",
        );
        assert_eq!(out.claims[1].object_text_canonical, "喉が今日に悪化した");
    }

    #[test]
    fn test_missing_action_augmented() {
        let out = normalize(
            vec![Claim::new("me", Predicate::Did, "洗濯した")],
            "洗濯した、明日は会議の準備をする予定",
        );
        assert_eq!(out.claims.len(), 2);
        let added = &out.claims[1];
        assert_eq!(added.predicate, Predicate::Planned);
        assert_eq!(added.modality, Modality::Plan);
        assert_eq!(added.me_role, MeRole::Actor);
        assert!((added.certainty - PLAN_CLAUSE_CERTAINTY).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_links_dropped() {
        let bundle = ClaimBundle {
            claims: vec![Claim::new("me", Predicate::Did, "散歩した")],
            links: vec![ClaimLink {
                from_claim_index: 0,
                to_claim_index: 3,
                relation_type: RelationType::Supports,
                confidence: 0.9,
            }],
            ..Default::default()
        };
        let out = normalize_to_me_centric(bundle, "散歩した", None, &NormalizerConfig::default());
        assert!(out.links.is_empty());
    }
}
