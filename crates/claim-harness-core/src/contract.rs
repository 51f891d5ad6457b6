//! Structured-output contract between the extractor and an external model.
//!
//! [`claims_response_schema`] is the strict JSON schema sent with every
//! request: every object property is `required` (optional values are
//! nullable) and no additional properties are allowed.
//!
//! [`parse_claims_output`] is deliberately tolerant. The model is not
//! trusted to honour the schema, so each claim, dimension, span, entity,
//! and link is validated on its own and dropped if malformed; one bad item
//! never fails the whole response.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::{
    Claim, ClaimBundle, ClaimLink, Dimension, DimensionSource, DimensionType, Entity, EntityType,
    EvidenceSpan, MeRole, Modality, Polarity, Predicate, RelationType,
};
use crate::text::truncate_chars;

/// Name sent as `response_format.json_schema.name`.
pub const SCHEMA_NAME: &str = "fact_claims_output";

pub const MAX_SUBJECT_CHARS: usize = 120;
pub const MAX_PREDICATE_CHARS: usize = 80;
pub const MAX_OBJECT_CHARS: usize = 1000;
pub const MAX_TIME_CHARS: usize = 40;
pub const MAX_ENTITY_NAME_CHARS: usize = 160;
pub const MAX_DIMENSION_VALUE_CHARS: usize = 200;
pub const MAX_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContractError {
    #[error("model response missing choices")]
    MissingChoices,
    #[error("model response content is not a JSON string")]
    NonTextContent,
    #[error("model output is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("model output is not a JSON object")]
    NotAnObject,
}

fn sorted(names: impl IntoIterator<Item = &'static str>) -> Vec<&'static str> {
    let mut v: Vec<&'static str> = names.into_iter().collect();
    v.sort_unstable();
    v
}

/// The strict response schema.
pub fn claims_response_schema() -> Value {
    let predicates = sorted(Predicate::VOCABULARY.iter().copied());
    let me_roles = sorted(MeRole::ALL.iter().map(|v| v.as_str()));
    let modalities = sorted(Modality::ALL.iter().map(|v| v.as_str()));
    let polarities = sorted(Polarity::ALL.iter().map(|v| v.as_str()));
    let dimension_types = sorted(DimensionType::ALL.iter().map(|v| v.as_str()));
    let dimension_sources = sorted(DimensionSource::ALL.iter().map(|v| v.as_str()));
    let entity_types = sorted(EntityType::ALL.iter().map(|v| v.as_str()));
    let relations = sorted(RelationType::ALL.iter().map(|v| v.as_str()));

    let dimension = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["dimension_type", "dimension_value", "confidence", "source"],
        "properties": {
            "dimension_type": {"type": "string", "enum": dimension_types},
            "dimension_value": {"type": "string", "minLength": 1, "maxLength": MAX_DIMENSION_VALUE_CHARS},
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "source": {"type": "string", "enum": dimension_sources},
        },
    });

    let evidence_span = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["char_start", "char_end", "excerpt"],
        "properties": {
            "char_start": {"type": ["integer", "null"], "minimum": 0},
            "char_end": {"type": ["integer", "null"], "minimum": 0},
            "excerpt": {"type": "string", "minLength": 1, "maxLength": MAX_EXCERPT_CHARS},
        },
    });

    let claim = json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "subject_text", "predicate", "object_text_raw", "object_text_canonical",
            "me_role", "modality", "polarity", "certainty", "time_start_utc",
            "time_end_utc", "subject_entity_name", "object_entity_name",
            "dimensions", "evidence_spans",
        ],
        "properties": {
            "subject_text": {"type": "string", "minLength": 1, "maxLength": MAX_SUBJECT_CHARS},
            "predicate": {"type": "string", "enum": predicates},
            "object_text_raw": {"type": "string", "minLength": 1, "maxLength": MAX_OBJECT_CHARS},
            "object_text_canonical": {"type": "string", "minLength": 1, "maxLength": MAX_OBJECT_CHARS},
            "me_role": {"type": "string", "enum": me_roles},
            "modality": {"type": "string", "enum": modalities},
            "polarity": {"type": "string", "enum": polarities},
            "certainty": {"type": "number", "minimum": 0, "maximum": 1},
            "time_start_utc": {"type": ["string", "null"], "maxLength": MAX_TIME_CHARS},
            "time_end_utc": {"type": ["string", "null"], "maxLength": MAX_TIME_CHARS},
            "subject_entity_name": {"type": ["string", "null"], "maxLength": MAX_ENTITY_NAME_CHARS},
            "object_entity_name": {"type": ["string", "null"], "maxLength": MAX_ENTITY_NAME_CHARS},
            "dimensions": {"type": "array", "items": dimension},
            "evidence_spans": {"type": "array", "items": evidence_span},
        },
    });

    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["claims", "entities", "links"],
        "properties": {
            "claims": {"type": "array", "items": claim},
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["name", "entity_type", "aliases"],
                    "properties": {
                        "name": {"type": "string", "minLength": 1, "maxLength": MAX_ENTITY_NAME_CHARS},
                        "entity_type": {"type": "string", "enum": entity_types},
                        "aliases": {
                            "type": "array",
                            "items": {"type": "string", "minLength": 1, "maxLength": MAX_ENTITY_NAME_CHARS},
                        },
                    },
                },
            },
            "links": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["from_claim_index", "to_claim_index", "relation_type", "confidence"],
                    "properties": {
                        "from_claim_index": {"type": "integer", "minimum": 0},
                        "to_claim_index": {"type": "integer", "minimum": 0},
                        "relation_type": {"type": "string", "enum": relations},
                        "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                    },
                },
            },
        },
    })
}

// ============ Tolerant field access ============

/// String form of a scalar field, trimmed. Missing or null is empty.
fn text(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Non-empty trimmed string, or `None`.
fn optional_text(obj: &Map<String, Value>, key: &str, max: usize) -> Option<String> {
    let value = text(obj, key);
    if value.is_empty() {
        None
    } else {
        Some(truncate_chars(&value, max))
    }
}

/// A probability in `[0, 1]`. Missing counts as 0; numeric strings parse.
fn unit_interval(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match obj.get(key) {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => n.as_f64()?,
        Some(Value::String(s)) => s.trim().parse::<f64>().ok()?,
        Some(_) => return None,
    };
    (0.0..=1.0).contains(&value).then_some(value)
}

fn offset(obj: &Map<String, Value>, key: &str) -> Option<u32> {
    obj.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

fn items<'a>(obj: &'a Map<String, Value>, key: &str) -> impl Iterator<Item = &'a Map<String, Value>> {
    obj.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

// ============ Item parsers ============

fn parse_span(obj: &Map<String, Value>) -> Option<EvidenceSpan> {
    let excerpt = text(obj, "excerpt");
    if excerpt.is_empty() {
        return None;
    }
    let (mut start, mut end) = (offset(obj, "char_start"), offset(obj, "char_end"));
    match (start, end) {
        (Some(s), Some(e)) if e > s => {}
        _ => {
            start = None;
            end = None;
        }
    }
    Some(EvidenceSpan {
        char_start: start,
        char_end: end,
        excerpt: truncate_chars(&excerpt, MAX_EXCERPT_CHARS),
    })
}

fn parse_dimension(obj: &Map<String, Value>) -> Option<Dimension> {
    let dimension_type = text(obj, "dimension_type").parse::<DimensionType>().ok()?;
    let value = text(obj, "dimension_value");
    if value.is_empty() {
        return None;
    }
    let source = match obj.get("source") {
        None => DimensionSource::Llm,
        Some(_) => text(obj, "source").parse::<DimensionSource>().ok()?,
    };
    Some(Dimension {
        dimension_type,
        dimension_value: truncate_chars(&value, MAX_DIMENSION_VALUE_CHARS),
        confidence: unit_interval(obj, "confidence")?,
        source,
    })
}

fn parse_claim(obj: &Map<String, Value>) -> Option<Claim> {
    let modality = text(obj, "modality").parse::<Modality>().ok()?;
    let polarity = text(obj, "polarity").parse::<Polarity>().ok()?;
    let me_role = text(obj, "me_role").parse::<MeRole>().ok()?;
    let certainty = unit_interval(obj, "certainty")?;

    let subject = text(obj, "subject_text");
    let predicate = Predicate::parse(&text(obj, "predicate"));
    if !predicate.is_canonical() {
        return None;
    }
    let raw = match obj.get("object_text_raw") {
        Some(_) => text(obj, "object_text_raw"),
        None => text(obj, "object_text"),
    };
    let canonical = match obj.get("object_text_canonical") {
        Some(_) => text(obj, "object_text_canonical"),
        None => raw.clone(),
    };
    if subject.is_empty() || raw.is_empty() || canonical.is_empty() {
        return None;
    }

    let evidence_spans: Vec<EvidenceSpan> = items(obj, "evidence_spans").filter_map(parse_span).collect();
    if evidence_spans.is_empty() {
        return None;
    }

    Some(Claim {
        subject_text: truncate_chars(&subject, MAX_SUBJECT_CHARS),
        predicate,
        object_text_raw: truncate_chars(&raw, MAX_OBJECT_CHARS),
        object_text_canonical: truncate_chars(&canonical, MAX_OBJECT_CHARS),
        me_role,
        modality,
        polarity,
        certainty,
        time_start_utc: optional_text(obj, "time_start_utc", MAX_TIME_CHARS),
        time_end_utc: optional_text(obj, "time_end_utc", MAX_TIME_CHARS),
        subject_entity_name: optional_text(obj, "subject_entity_name", MAX_ENTITY_NAME_CHARS),
        object_entity_name: optional_text(obj, "object_entity_name", MAX_ENTITY_NAME_CHARS),
        dimensions: items(obj, "dimensions").filter_map(parse_dimension).collect(),
        evidence_spans,
    })
}

fn parse_entity(obj: &Map<String, Value>) -> Option<Entity> {
    let name = text(obj, "name");
    let entity_type = text(obj, "entity_type").parse::<EntityType>().ok()?;
    if name.is_empty() {
        return None;
    }
    let aliases = obj
        .get("aliases")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| truncate_chars(a, MAX_ENTITY_NAME_CHARS))
        .collect();
    Some(Entity {
        name: truncate_chars(&name, MAX_ENTITY_NAME_CHARS),
        entity_type,
        aliases,
    })
}

fn parse_link(obj: &Map<String, Value>) -> Option<ClaimLink> {
    let relation_type = text(obj, "relation_type").parse::<RelationType>().ok()?;
    let index = |key: &str| {
        obj.get(key)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    };
    Some(ClaimLink {
        from_claim_index: index("from_claim_index")?,
        to_claim_index: index("to_claim_index")?,
        relation_type,
        confidence: unit_interval(obj, "confidence")?,
    })
}

/// Parse model output, dropping every malformed item.
///
/// Link indices are not range-checked here; the normalizer discards links
/// whose endpoints do not exist.
pub fn parse_claims_output(payload: &Value) -> Result<ClaimBundle, ContractError> {
    let obj = payload.as_object().ok_or(ContractError::NotAnObject)?;
    let bundle = ClaimBundle {
        claims: items(obj, "claims").filter_map(parse_claim).collect(),
        entities: items(obj, "entities").filter_map(parse_entity).collect(),
        links: items(obj, "links").filter_map(parse_link).collect(),
        quality_flags: Vec::new(),
    };
    tracing::debug!(
        claims = bundle.claims.len(),
        entities = bundle.entities.len(),
        links = bundle.links.len(),
        "parsed model output"
    );
    Ok(bundle)
}

/// Pull the JSON text out of a chat-completions response.
///
/// `choices[0].message.content` is either a string or a list of parts whose
/// `text` fields are concatenated.
pub fn extract_json_text(response: &Value) -> Result<String, ContractError> {
    let first = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or(ContractError::MissingChoices)?;
    match first.get("message").and_then(|m| m.get("content")) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Array(parts)) => {
            let joined: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            let joined = joined.trim();
            if joined.is_empty() {
                Err(ContractError::NonTextContent)
            } else {
                Ok(joined.to_string())
            }
        }
        _ => Err(ContractError::NonTextContent),
    }
}

/// Extract and parse the claims payload from a chat-completions response.
pub fn parse_chat_response(response: &Value) -> Result<ClaimBundle, ContractError> {
    let json_text = extract_json_text(response)?;
    let payload: Value = serde_json::from_str(&json_text)?;
    parse_claims_output(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim_json(overrides: Value) -> Value {
        let mut base = json!({
            "subject_text": "me",
            "predicate": "did",
            "object_text_raw": "洗濯した",
            "object_text_canonical": "洗濯した",
            "me_role": "actor",
            "modality": "fact",
            "polarity": "affirm",
            "certainty": 0.9,
            "time_start_utc": null,
            "time_end_utc": null,
            "subject_entity_name": null,
            "object_entity_name": null,
            "dimensions": [],
            "evidence_spans": [{"char_start": 0, "char_end": 4, "excerpt": "洗濯した"}],
        });
        if let (Some(b), Some(o)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in o {
                b.insert(k.clone(), v.clone());
            }
        }
        base
    }

    #[test]
    fn test_schema_is_strict() {
        let schema = claims_response_schema();
        let claim = &schema["properties"]["claims"]["items"];
        assert_eq!(claim["additionalProperties"], json!(false));
        let required = claim["required"].as_array().unwrap();
        let props = claim["properties"].as_object().unwrap();
        assert_eq!(required.len(), props.len());
        for key in props.keys() {
            assert!(required.contains(&json!(key)), "{} not required", key);
        }
        let predicates = claim["properties"]["predicate"]["enum"].as_array().unwrap();
        assert_eq!(predicates.len(), 14);
        assert_eq!(predicates[0], json!("chose"));
    }

    #[test]
    fn test_valid_claim_parses() {
        let bundle = parse_claims_output(&json!({
            "claims": [claim_json(json!({}))],
            "entities": [],
            "links": [],
        }))
        .unwrap();
        assert_eq!(bundle.claims.len(), 1);
        assert_eq!(bundle.claims[0].evidence_spans[0].char_end, Some(4));
    }

    #[test]
    fn test_invalid_claims_dropped() {
        let bundle = parse_claims_output(&json!({
            "claims": [
                claim_json(json!({"modality": "rumor"})),
                claim_json(json!({"certainty": 1.5})),
                claim_json(json!({"certainty": "high"})),
                claim_json(json!({"predicate": "walked"})),
                claim_json(json!({"subject_text": "  "})),
                claim_json(json!({"evidence_spans": [{"char_start": null, "char_end": null, "excerpt": " "}]})),
                "not an object",
                claim_json(json!({"certainty": "0.4"})),
            ],
        }))
        .unwrap();
        assert_eq!(bundle.claims.len(), 1);
        assert!((bundle.claims[0].certainty - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_span_offsets_nulled() {
        let bundle = parse_claims_output(&json!({
            "claims": [
                claim_json(json!({"evidence_spans": [{"char_start": 3, "char_end": null, "excerpt": "a"}]})),
                claim_json(json!({"evidence_spans": [{"char_start": 5, "char_end": 5, "excerpt": "b"}]})),
                claim_json(json!({"evidence_spans": [{"char_start": -1, "char_end": 4, "excerpt": "c"}]})),
            ],
        }))
        .unwrap();
        for claim in &bundle.claims {
            assert_eq!(claim.evidence_spans[0].char_start, None);
            assert_eq!(claim.evidence_spans[0].char_end, None);
        }
    }

    #[test]
    fn test_dimensions_entities_links_filtered() {
        let bundle = parse_claims_output(&json!({
            "claims": [claim_json(json!({"dimensions": [
                {"dimension_type": "activity", "dimension_value": "洗濯", "confidence": 0.8, "source": "llm"},
                {"dimension_type": "mood", "dimension_value": "x", "confidence": 0.8, "source": "llm"},
                {"dimension_type": "topic", "dimension_value": "", "confidence": 0.8, "source": "llm"},
            ]}))],
            "entities": [
                {"name": "田中", "entity_type": "person", "aliases": ["田中さん", " ", 3]},
                {"name": "", "entity_type": "person", "aliases": []},
                {"name": "X", "entity_type": "robot", "aliases": []},
            ],
            "links": [
                {"from_claim_index": 0, "to_claim_index": 1, "relation_type": "caused_by", "confidence": 0.7},
                {"from_claim_index": 0, "to_claim_index": 1, "relation_type": "causes", "confidence": 0.7},
                {"from_claim_index": "0", "to_claim_index": 1, "relation_type": "supports", "confidence": 0.7},
                {"from_claim_index": 0, "to_claim_index": 1, "relation_type": "supports", "confidence": 2},
            ],
        }))
        .unwrap();
        assert_eq!(bundle.claims[0].dimensions.len(), 1);
        assert_eq!(bundle.entities.len(), 1);
        assert_eq!(bundle.entities[0].aliases, vec!["田中さん".to_string()]);
        assert_eq!(bundle.links.len(), 1);
    }

    #[test]
    fn test_not_an_object() {
        assert!(matches!(
            parse_claims_output(&json!([])),
            Err(ContractError::NotAnObject)
        ));
    }

    #[test]
    fn test_extract_json_text() {
        let string_content = json!({"choices": [{"message": {"content": "{\"claims\": []}"}}]});
        assert_eq!(extract_json_text(&string_content).unwrap(), "{\"claims\": []}");

        let parts = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "{\"claims\""},
            {"type": "text", "text": ": []}"},
        ]}}]});
        assert_eq!(extract_json_text(&parts).unwrap(), "{\"claims\": []}");

        assert!(matches!(extract_json_text(&json!({})), Err(ContractError::MissingChoices)));
        assert!(matches!(
            extract_json_text(&json!({"choices": [{"message": {"content": null}}]})),
            Err(ContractError::NonTextContent)
        ));
    }
}
