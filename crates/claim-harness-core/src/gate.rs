//! Quality gate and deduplication.
//!
//! The gate runs after normalization and guarantees the two bundle
//! invariants persistence relies on:
//!
//! - every surviving claim has a non-empty canonical object;
//! - every surviving link references surviving claims.
//!
//! Links are re-indexed through an old → new index map. A link touching a
//! dropped claim is discarded, never redirected.

use std::collections::HashSet;

use crate::lexicon::Lexicon;
use crate::models::{Claim, ClaimBundle, ClaimLink, Fact};
use crate::tokenizer::Tokenizer;

static_regex!(dedupe_strip_re, r"[^0-9a-zぁ-んァ-ヶ一-龠ー]");

/// Maximum lemmas kept in a normalized dedup key.
const MAX_KEY_LEMMAS: usize = 16;

/// Rewrite links through `index_map`, dropping any whose endpoint was removed.
pub fn reindex_links(links: &[ClaimLink], index_map: &[Option<usize>]) -> Vec<ClaimLink> {
    links
        .iter()
        .filter_map(|link| {
            let from = index_map.get(link.from_claim_index).copied().flatten()?;
            let to = index_map.get(link.to_claim_index).copied().flatten()?;
            Some(ClaimLink {
                from_claim_index: from,
                to_claim_index: to,
                ..link.clone()
            })
        })
        .collect()
}

/// Keep claims for which `keep` returns true; re-index links to match.
fn retain_claims(
    bundle: ClaimBundle,
    mut keep: impl FnMut(usize, &Claim) -> bool,
) -> (ClaimBundle, Vec<usize>) {
    let mut index_map = Vec::with_capacity(bundle.claims.len());
    let mut claims = Vec::with_capacity(bundle.claims.len());
    let mut dropped = Vec::new();

    for (idx, claim) in bundle.claims.into_iter().enumerate() {
        if keep(idx, &claim) {
            index_map.push(Some(claims.len()));
            claims.push(claim);
        } else {
            index_map.push(None);
            dropped.push(idx);
        }
    }

    let links = reindex_links(&bundle.links, &index_map);
    (
        ClaimBundle {
            claims,
            entities: bundle.entities,
            links,
            quality_flags: bundle.quality_flags,
        },
        dropped,
    )
}

/// Reject claims whose canonical object is blank.
///
/// Each rejection adds a `claim_rejected:<original index>` flag.
pub fn apply_quality_gate(bundle: ClaimBundle) -> ClaimBundle {
    let (mut gated, dropped) =
        retain_claims(bundle, |_, claim| !claim.object_text_canonical.trim().is_empty());
    for idx in &dropped {
        tracing::debug!(claim_index = idx, "claim rejected: empty canonical object");
        gated.quality_flags.push(format!("claim_rejected:{}", idx));
    }
    gated
}

/// Normalized form of an object used for near-duplicate detection.
///
/// With tokens: the first 16 non-stop lemmas joined by spaces. Without:
/// whitespace removed, lowercased, only ASCII alphanumerics and kana/kanji
/// kept.
pub fn normalize_for_dedupe(text: &str, tokenizer: &dyn Tokenizer, lexicon: &Lexicon) -> String {
    let lemmas: Vec<String> = tokenizer
        .tokenize(text)
        .iter()
        .map(|t| t.normalized_lemma())
        .filter(|l| !l.is_empty() && !lexicon.is_stop(l))
        .take(MAX_KEY_LEMMAS)
        .collect();
    if !lemmas.is_empty() {
        return lemmas.join(" ");
    }
    let squeezed: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    dedupe_strip_re().replace_all(&squeezed, "").into_owned()
}

type TripleKey = (String, String, String);

/// Tracks exact and normalized triples already accepted.
struct SeenTriples<'a> {
    tokenizer: &'a dyn Tokenizer,
    lexicon: &'a Lexicon,
    exact: HashSet<TripleKey>,
    normalized: HashSet<TripleKey>,
}

impl<'a> SeenTriples<'a> {
    fn new(tokenizer: &'a dyn Tokenizer, lexicon: &'a Lexicon) -> Self {
        Self {
            tokenizer,
            lexicon,
            exact: HashSet::new(),
            normalized: HashSet::new(),
        }
    }

    /// Record the triple; false when it (or its normalized form) was seen.
    fn insert(&mut self, subject: &str, predicate: &str, object: &str) -> bool {
        let exact = (
            subject.trim().to_string(),
            predicate.trim().to_string(),
            object.trim().to_string(),
        );
        let normalized = (
            subject.trim().to_lowercase(),
            predicate.trim().to_lowercase(),
            normalize_for_dedupe(object, self.tokenizer, self.lexicon),
        );
        if self.exact.contains(&exact) || self.normalized.contains(&normalized) {
            return false;
        }
        self.exact.insert(exact);
        self.normalized.insert(normalized);
        true
    }
}

/// Drop duplicate facts and facts with a blank key part; keep at most `max`.
pub fn dedupe_facts(
    facts: Vec<Fact>,
    tokenizer: &dyn Tokenizer,
    lexicon: &Lexicon,
    max: usize,
) -> Vec<Fact> {
    let mut seen = SeenTriples::new(tokenizer, lexicon);
    let mut out = Vec::new();
    for fact in facts {
        if out.len() >= max {
            break;
        }
        let (subject, predicate, object) = fact.key();
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            continue;
        }
        if seen.insert(&subject, &predicate, &object) {
            out.push(fact);
        }
    }
    out
}

/// Drop duplicate claims (by subject, predicate, canonical object) and cap
/// the set at `max`. Links follow the surviving claims.
pub fn dedupe_claims(
    bundle: ClaimBundle,
    tokenizer: &dyn Tokenizer,
    lexicon: &Lexicon,
    max: usize,
) -> ClaimBundle {
    let mut seen = SeenTriples::new(tokenizer, lexicon);
    let mut kept = 0usize;
    let (mut deduped, dropped) = retain_claims(bundle, |_, claim| {
        if kept >= max {
            return false;
        }
        let fresh = seen.insert(
            &claim.subject_text,
            claim.predicate.as_str(),
            &claim.object_text_canonical,
        );
        if fresh {
            kept += 1;
        }
        fresh
    });
    for idx in dropped {
        deduped.quality_flags.push(format!("claim_deduped:{}", idx));
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ObjectType, Predicate, RelationType};
    use crate::tokenizer::{DisabledTokenizer, ScriptRunTokenizer};
    use proptest::prelude::*;

    fn fact(subject: &str, predicate: &str, object: &str) -> Fact {
        Fact {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object_text: object.to_string(),
            object_type: ObjectType::Text,
            object_json: None,
            evidence_excerpt: None,
            occurred_at: None,
            confidence: 0.8,
        }
    }

    fn link(from: usize, to: usize) -> ClaimLink {
        ClaimLink {
            from_claim_index: from,
            to_claim_index: to,
            relation_type: RelationType::CausedBy,
            confidence: 0.75,
        }
    }

    #[test]
    fn test_dedupe_spacing_variants() {
        let lex = Lexicon::default();
        let facts = vec![
            fact("me", "learned", "retry 戦略"),
            fact("me", "learned", "retry戦略"),
        ];
        let out = dedupe_facts(facts, &DisabledTokenizer, &lex, 12);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].object_text, "retry 戦略");
    }

    #[test]
    fn test_dedupe_spacing_variants_with_tokens() {
        let lex = Lexicon::default();
        let facts = vec![
            fact("me", "learned", "retry 戦略"),
            fact("me", "learned", "retry戦略"),
        ];
        let out = dedupe_facts(facts, &ScriptRunTokenizer, &lex, 12);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_dedupe_skips_blank_and_caps() {
        let lex = Lexicon::default();
        let facts = vec![
            fact("me", "learned", "  "),
            fact("me", "learned", "a1"),
            fact("me", "learned", "b2"),
            fact("me", "learned", "c3"),
        ];
        let out = dedupe_facts(facts, &DisabledTokenizer, &lex, 2);
        let objects: Vec<&str> = out.iter().map(|f| f.object_text.as_str()).collect();
        assert_eq!(objects, vec!["a1", "b2"]);
    }

    #[test]
    fn test_gate_rewrites_links() {
        let bundle = ClaimBundle {
            claims: vec![
                Claim::new("me", Predicate::Did, " "),
                Claim::new("weather", Predicate::Happened, "雨が降った"),
                Claim::new("me", Predicate::Ended, "即解散した"),
            ],
            links: vec![link(2, 1), link(0, 1)],
            ..Default::default()
        };
        let gated = apply_quality_gate(bundle);
        assert_eq!(gated.claims.len(), 2);
        assert_eq!(gated.links, vec![link(1, 0)]);
        assert_eq!(gated.quality_flags, vec!["claim_rejected:0".to_string()]);
    }

    #[test]
    fn test_dedupe_claims_redirects_nothing() {
        let lex = Lexicon::default();
        let bundle = ClaimBundle {
            claims: vec![
                Claim::new("me", Predicate::Did, "洗濯"),
                Claim::new("me", Predicate::Did, "洗濯"),
                Claim::new("me", Predicate::Ended, "解散"),
            ],
            links: vec![link(2, 1), link(2, 0)],
            ..Default::default()
        };
        let out = dedupe_claims(bundle, &DisabledTokenizer, &lex, 64);
        assert_eq!(out.claims.len(), 2);
        assert_eq!(out.links, vec![link(1, 0)]);
        assert!(out.quality_flags.contains(&"claim_deduped:1".to_string()));
    }

    fn arb_object() -> impl Strategy<Value = String> {
        prop_oneof![Just(String::new()), Just("  ".to_string()), "[a-z雨晴]{1,6}"]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_gate_invariants(
            objects in proptest::collection::vec(arb_object(), 0..8),
            raw_links in proptest::collection::vec((0usize..10, 0usize..10), 0..12),
        ) {
            let bundle = ClaimBundle {
                claims: objects
                    .iter()
                    .map(|o| Claim::new("me", Predicate::Did, o.clone()))
                    .collect(),
                links: raw_links.iter().map(|(a, b)| link(*a, *b)).collect(),
                ..Default::default()
            };
            let gated = apply_quality_gate(bundle);
            for claim in &gated.claims {
                prop_assert!(!claim.object_text_canonical.trim().is_empty());
            }
            prop_assert!(gated.links_in_range());
        }
    }
}
