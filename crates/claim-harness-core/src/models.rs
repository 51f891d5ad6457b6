//! Core data models used throughout Claim Harness.
//!
//! These types represent the documents, claims, entities, links, and facts
//! that flow through the extraction and normalization pipeline. Closed
//! vocabularies (modality, polarity, relation types, ...) are plain enums
//! whose wire names match the structured-output contract exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string did not belong to a closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {vocabulary} value: {value:?}")]
pub struct UnknownTerm {
    pub vocabulary: &'static str,
    pub value: String,
}

macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            /// Every member, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownTerm;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(UnknownTerm {
                        vocabulary: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

vocabulary!(
    /// How a claim is asserted.
    Modality {
        Fact => "fact",
        Plan => "plan",
        Hypothesis => "hypothesis",
        Request => "request",
        Feeling => "feeling",
    }
);

vocabulary!(
    Polarity {
        Affirm => "affirm",
        Negate => "negate",
    }
);

vocabulary!(
    /// The authoring user's role in a claim.
    MeRole {
        Actor => "actor",
        Experiencer => "experiencer",
        Observer => "observer",
        Recipient => "recipient",
        Unassigned => "none",
    }
);

vocabulary!(
    EntityType {
        Person => "person",
        Organization => "organization",
        Project => "project",
        Place => "place",
        Concept => "concept",
        Other => "other",
    }
);

vocabulary!(
    /// Directed relation between two claims of the same bundle.
    RelationType {
        Supports => "supports",
        Contradicts => "contradicts",
        CausedBy => "caused_by",
        FollowUp => "follow_up",
        SameEvent => "same_event",
    }
);

vocabulary!(
    DimensionType {
        Person => "person",
        Place => "place",
        Activity => "activity",
        Emotion => "emotion",
        Health => "health",
        Topic => "topic",
        Project => "project",
        Item => "item",
        Reason => "reason",
        TimeHint => "time_hint",
    }
);

vocabulary!(
    DimensionSource {
        Llm => "llm",
        Rule => "rule",
        Manual => "manual",
    }
);

vocabulary!(
    /// Value type of a fact's object.
    ObjectType {
        Text => "text",
        Number => "number",
        Date => "date",
        Bool => "bool",
        Json => "json",
    }
);

vocabulary!(
    RiskLevel {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

vocabulary!(
    /// Redaction outcome recorded on a document.
    RedactionState {
        Clear => "none",
        Masked => "masked",
        Blocked => "blocked",
    }
);

// ============ Predicates ============

/// Canonical claim predicate.
///
/// Model output and rule facts may carry arbitrary predicate strings; those
/// are held in [`Predicate::Other`] until the normalizer maps them onto the
/// fixed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Predicate {
    Did,
    WasWith,
    WentTo,
    Experienced,
    Chose,
    Ended,
    Felt,
    WasAffectedBy,
    Happened,
    Decided,
    Learned,
    Planned,
    Requested,
    Mentions,
    Other(String),
}

impl Predicate {
    /// Wire names of the fixed vocabulary, in declaration order.
    pub const VOCABULARY: &'static [&'static str] = &[
        "did",
        "was_with",
        "went_to",
        "experienced",
        "chose",
        "ended",
        "felt",
        "was_affected_by",
        "happened",
        "decided",
        "learned",
        "planned",
        "requested",
        "mentions",
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Predicate::Did => "did",
            Predicate::WasWith => "was_with",
            Predicate::WentTo => "went_to",
            Predicate::Experienced => "experienced",
            Predicate::Chose => "chose",
            Predicate::Ended => "ended",
            Predicate::Felt => "felt",
            Predicate::WasAffectedBy => "was_affected_by",
            Predicate::Happened => "happened",
            Predicate::Decided => "decided",
            Predicate::Learned => "learned",
            Predicate::Planned => "planned",
            Predicate::Requested => "requested",
            Predicate::Mentions => "mentions",
            Predicate::Other(s) => s,
        }
    }

    /// Parse a string, keeping unknown values as [`Predicate::Other`].
    pub fn parse(s: &str) -> Self {
        match s {
            "did" => Predicate::Did,
            "was_with" => Predicate::WasWith,
            "went_to" => Predicate::WentTo,
            "experienced" => Predicate::Experienced,
            "chose" => Predicate::Chose,
            "ended" => Predicate::Ended,
            "felt" => Predicate::Felt,
            "was_affected_by" => Predicate::WasAffectedBy,
            "happened" => Predicate::Happened,
            "decided" => Predicate::Decided,
            "learned" => Predicate::Learned,
            "planned" => Predicate::Planned,
            "requested" => Predicate::Requested,
            "mentions" => Predicate::Mentions,
            other => Predicate::Other(other.to_string()),
        }
    }

    pub fn is_canonical(&self) -> bool {
        !matches!(self, Predicate::Other(_))
    }

    /// Predicates that record a choice or an ending.
    pub fn is_decision(&self) -> bool {
        matches!(self, Predicate::Chose | Predicate::Ended | Predicate::Decided)
    }

    /// Predicates that record something happening to the user or the world.
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            Predicate::Happened | Predicate::Experienced | Predicate::WasAffectedBy
        )
    }
}

impl From<String> for Predicate {
    fn from(s: String) -> Self {
        Predicate::parse(&s)
    }
}

impl From<Predicate> for String {
    fn from(p: Predicate) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Documents and source records ============

/// A text document awaiting claim extraction.
///
/// Created upstream; this crate only ever writes back its redaction state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub entry_id: String,
    pub raw_text: String,
    pub declared_type: String,
    /// RFC 3339 occurrence time, used as the default claim start time.
    pub occurred_at: Option<String>,
    pub pii_score: f64,
    pub redaction_state: RedactionState,
}

/// A note row, as seen by the rule extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: String,
    /// `journal`, `memo`, ... Only journal notes carry a journal date fact.
    pub note_type: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: String,
    pub source_url: Option<String>,
    pub journal_date: Option<String>,
    pub mood_score: Option<f64>,
    pub energy_score: Option<f64>,
    pub occurred_at: Option<String>,
}

/// A task row, as seen by the rule extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub details: Option<String>,
    pub status: String,
    pub priority: i64,
    pub due_at: Option<String>,
    pub scheduled_at: Option<String>,
    pub completed_at: Option<String>,
    pub source_note_id: Option<String>,
}

// ============ Claims ============

/// A span of source text backing a claim.
///
/// Offsets are either both present with `char_end > char_start`, or both
/// absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub char_start: Option<u32>,
    pub char_end: Option<u32>,
    pub excerpt: String,
}

impl EvidenceSpan {
    pub fn excerpt(excerpt: impl Into<String>) -> Self {
        Self {
            char_start: None,
            char_end: None,
            excerpt: excerpt.into(),
        }
    }
}

/// A typed tag attached to a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub dimension_type: DimensionType,
    pub dimension_value: String,
    pub confidence: f64,
    pub source: DimensionSource,
}

/// One atomic subject–predicate–object assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub subject_text: String,
    pub predicate: Predicate,
    pub object_text_raw: String,
    pub object_text_canonical: String,
    pub me_role: MeRole,
    pub modality: Modality,
    pub polarity: Polarity,
    pub certainty: f64,
    pub time_start_utc: Option<String>,
    pub time_end_utc: Option<String>,
    pub subject_entity_name: Option<String>,
    pub object_entity_name: Option<String>,
    pub dimensions: Vec<Dimension>,
    pub evidence_spans: Vec<EvidenceSpan>,
}

impl Claim {
    /// A plain affirmed fact with no role, time, or evidence.
    pub fn new(
        subject: impl Into<String>,
        predicate: Predicate,
        object: impl Into<String>,
    ) -> Self {
        let object = object.into();
        Self {
            subject_text: subject.into(),
            predicate,
            object_text_raw: object.clone(),
            object_text_canonical: object,
            me_role: MeRole::Unassigned,
            modality: Modality::Fact,
            polarity: Polarity::Affirm,
            certainty: 0.5,
            time_start_utc: None,
            time_end_utc: None,
            subject_entity_name: None,
            object_entity_name: None,
            dimensions: Vec::new(),
            evidence_spans: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, excerpt: impl Into<String>) -> Self {
        self.evidence_spans.push(EvidenceSpan::excerpt(excerpt));
        self
    }

    pub fn is_me(&self) -> bool {
        self.subject_text == "me"
    }
}

/// A named entity with optional aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
}

/// A directed edge between two claims, by index into the bundle's claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimLink {
    pub from_claim_index: usize,
    pub to_claim_index: usize,
    pub relation_type: RelationType,
    pub confidence: f64,
}

/// Everything extracted from one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimBundle {
    pub claims: Vec<Claim>,
    pub entities: Vec<Entity>,
    pub links: Vec<ClaimLink>,
    /// Diagnostics recorded by the normalizer and gate.
    #[serde(default)]
    pub quality_flags: Vec<String>,
}

impl ClaimBundle {
    /// True when every link references an existing claim.
    pub fn links_in_range(&self) -> bool {
        let n = self.claims.len();
        self.links
            .iter()
            .all(|l| l.from_claim_index < n && l.to_claim_index < n)
    }
}

// ============ Facts ============

/// A rule-derived subject/predicate/object triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub subject: String,
    pub predicate: String,
    pub object_text: String,
    pub object_type: ObjectType,
    pub object_json: Option<serde_json::Value>,
    pub evidence_excerpt: Option<String>,
    pub occurred_at: Option<String>,
    pub confidence: f64,
}

impl Fact {
    /// Identity key: the whitespace-trimmed triple.
    pub fn key(&self) -> (String, String, String) {
        (
            self.subject.trim().to_string(),
            self.predicate.trim().to_string(),
            self.object_text.trim().to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_wire_names() {
        assert_eq!(MeRole::Unassigned.as_str(), "none");
        assert_eq!("caused_by".parse::<RelationType>(), Ok(RelationType::CausedBy));
        assert!("causes".parse::<RelationType>().is_err());
        assert_eq!(
            serde_json::to_value(DimensionType::TimeHint).unwrap(),
            serde_json::json!("time_hint")
        );
    }

    #[test]
    fn test_predicate_roundtrip_and_other() {
        for name in Predicate::VOCABULARY {
            let p = Predicate::parse(name);
            assert!(p.is_canonical(), "{} should be canonical", name);
            assert_eq!(p.as_str(), *name);
        }
        let p: Predicate = serde_json::from_value(serde_json::json!("went")).unwrap();
        assert_eq!(p, Predicate::Other("went".to_string()));
        assert!(!p.is_canonical());
    }

    #[test]
    fn test_predicate_classes() {
        assert!(Predicate::Ended.is_decision());
        assert!(!Predicate::Happened.is_decision());
        assert!(Predicate::WasAffectedBy.is_event());
        assert!(!Predicate::Did.is_event());
    }

    #[test]
    fn test_links_in_range() {
        let mut bundle = ClaimBundle {
            claims: vec![Claim::new("me", Predicate::Did, "a")],
            ..Default::default()
        };
        assert!(bundle.links_in_range());
        bundle.links.push(ClaimLink {
            from_claim_index: 0,
            to_claim_index: 1,
            relation_type: RelationType::CausedBy,
            confidence: 0.7,
        });
        assert!(!bundle.links_in_range());
    }
}
