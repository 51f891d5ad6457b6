//! Rule-derived key facts.
//!
//! Runs the local [`RuleExtractor`] over a document, note, or task and
//! stores the resulting triples in `key_facts`. No text leaves the machine,
//! so no redaction gate applies.
//!
//! Facts are validated and filtered by `extract.min_confidence` before
//! insertion. Inserts are insert-or-ignore against the unique index on the
//! active `(source, subject, predicate, object)` triple; with `replace`, the
//! source's active facts are soft-deleted first, in the same transaction.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use claim_harness_core::lexicon::Lexicon;
use claim_harness_core::models::{Document, Fact, NoteRecord, TaskRecord};
use claim_harness_core::rules::{validate_fact, RuleExtractor, EXTRACTOR_VERSION};
use claim_harness_core::tokenizer::Tokenizer;

use crate::sqlite_store::now_iso;

/// A record the rule extractor can read.
#[derive(Debug, Clone)]
pub enum FactSource {
    Document(Document),
    Note(NoteRecord),
    Task(TaskRecord),
}

impl FactSource {
    pub fn source_type(&self) -> &'static str {
        match self {
            FactSource::Document(_) => "document",
            FactSource::Note(_) => "note",
            FactSource::Task(_) => "task",
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            FactSource::Document(doc) => &doc.id,
            FactSource::Note(note) => &note.id,
            FactSource::Task(task) => &task.id,
        }
    }

    pub fn extract(&self, extractor: &RuleExtractor<'_>) -> Vec<Fact> {
        match self {
            FactSource::Document(doc) => extractor.facts_from_document(doc),
            FactSource::Note(note) => extractor.facts_from_note(note),
            FactSource::Task(task) => extractor.facts_from_task(task),
        }
    }
}

/// Per-source counts reported by `clm facts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FactCounts {
    pub source_type: String,
    pub source_id: String,
    pub extracted: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub low_confidence: usize,
    pub replaced: u64,
}

/// Extract and store facts for one source.
pub async fn store_key_facts(
    pool: &SqlitePool,
    source: &FactSource,
    tokenizer: &dyn Tokenizer,
    lexicon: &Lexicon,
    max_facts: usize,
    min_confidence: f64,
    replace: bool,
) -> Result<FactCounts> {
    let extractor = RuleExtractor::new(lexicon, tokenizer, max_facts);
    let facts = source.extract(&extractor);

    let mut counts = FactCounts {
        source_type: source.source_type().to_string(),
        source_id: source.source_id().to_string(),
        extracted: facts.len(),
        ..Default::default()
    };

    let now = now_iso();
    let mut tx = pool.begin().await?;

    if replace {
        counts.replaced = sqlx::query(
            r#"
            UPDATE key_facts SET deleted_at = ?
            WHERE source_type = ? AND source_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&now)
        .bind(source.source_type())
        .bind(source.source_id())
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    for fact in &facts {
        let problems = validate_fact(fact);
        if !problems.is_empty() {
            tracing::debug!(
                source_id = source.source_id(),
                predicate = %fact.predicate,
                problems = %problems.join("; "),
                "fact rejected"
            );
            counts.invalid += 1;
            continue;
        }
        if fact.confidence < min_confidence {
            counts.low_confidence += 1;
            continue;
        }

        let object_json = fact
            .object_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO key_facts (
                id, source_type, source_id, subject, predicate, object_text, object_type,
                object_json, evidence_excerpt, occurred_at, confidence, extractor_version,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(source.source_type())
        .bind(source.source_id())
        .bind(fact.subject.trim())
        .bind(fact.predicate.trim())
        .bind(fact.object_text.trim())
        .bind(fact.object_type.as_str())
        .bind(object_json)
        .bind(fact.evidence_excerpt.as_deref())
        .bind(fact.occurred_at.as_deref())
        .bind(fact.confidence)
        .bind(EXTRACTOR_VERSION)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 1 {
            counts.inserted += 1;
        } else {
            counts.duplicates += 1;
        }
    }

    tx.commit().await?;

    tracing::info!(
        source_type = %counts.source_type,
        source_id = %counts.source_id,
        extracted = counts.extracted,
        inserted = counts.inserted,
        duplicates = counts.duplicates,
        "key facts stored"
    );

    Ok(counts)
}

/// Active facts of one source, for listing.
pub async fn active_facts(
    pool: &SqlitePool,
    source_type: &str,
    source_id: &str,
) -> Result<Vec<(String, String, String)>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT subject, predicate, object_text FROM key_facts
        WHERE source_type = ? AND source_id = ? AND deleted_at IS NULL
        ORDER BY created_at, rowid
        "#,
    )
    .bind(source_type)
    .bind(source_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
