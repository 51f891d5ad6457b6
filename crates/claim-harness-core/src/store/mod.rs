//! Storage abstraction for Claim Harness.
//!
//! The [`ClaimStore`] trait is the read side plus a transaction factory; all
//! writes for one document go through a single [`ClaimTx`], which the caller
//! commits only after the whole normalize → gate → dedupe → persist sequence
//! has succeeded.
//!
//! [`persist_bundle`] is the entity resolver and claim writer. It is written
//! once against the trait, so the SQLite backend in the application crate
//! and the in-memory backend here share the same persistence rules.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{
    Claim, ClaimBundle, Dimension, Document, EntityType, EvidenceSpan, RedactionState,
    RelationType,
};
use crate::text::normalize_alias;

/// Lifecycle status of a stored claim.
pub const STATUS_ACTIVE: &str = "active";
/// Status of claims replaced by a later extraction.
pub const STATUS_SUPERSEDED: &str = "superseded";

/// A claim row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewClaim {
    pub id: String,
    pub document_id: String,
    pub entry_id: String,
    pub extraction_id: String,
    pub extractor_version: String,
    pub subject_entity_id: Option<String>,
    pub object_entity_id: Option<String>,
    pub claim: Claim,
}

#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub id: String,
    pub claim_id: String,
    pub document_id: String,
    pub span: EvidenceSpan,
}

#[derive(Debug, Clone)]
pub struct NewDimension {
    pub id: String,
    pub claim_id: String,
    pub dimension: Dimension,
    /// Lookup form of the value (see [`normalize_alias`]).
    pub normalized_value: String,
}

#[derive(Debug, Clone)]
pub struct NewLink {
    pub id: String,
    pub from_claim_id: String,
    pub to_claim_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
}

/// A persisted claim as read back for listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredClaim {
    pub id: String,
    pub entry_id: String,
    pub subject_text: String,
    pub predicate: String,
    pub object_text_canonical: String,
    pub modality: String,
    pub certainty: f64,
    pub status: String,
    pub extraction_id: String,
}

/// Write surface for one document's extraction.
///
/// Every `insert_*` method has insert-or-ignore semantics and returns `true`
/// only when exactly one row was written.
#[async_trait]
pub trait ClaimTx: Send {
    async fn update_redaction(
        &mut self,
        document_id: &str,
        pii_score: f64,
        state: RedactionState,
    ) -> Result<()>;

    /// Look up an entity by `(type, canonical name)`.
    async fn find_entity(&mut self, entity_type: EntityType, name: &str) -> Result<Option<String>>;

    async fn insert_entity(&mut self, id: &str, entity_type: EntityType, name: &str) -> Result<()>;

    async fn insert_alias(&mut self, entity_id: &str, alias: &str, normalized: &str) -> Result<bool>;

    /// Mark every active claim of `entry_id` superseded. Returns rows touched.
    async fn supersede_claims(&mut self, entry_id: &str) -> Result<u64>;

    async fn insert_claim(&mut self, row: &NewClaim) -> Result<bool>;

    async fn insert_evidence(&mut self, row: &NewEvidence) -> Result<bool>;

    async fn insert_dimension(&mut self, row: &NewDimension) -> Result<bool>;

    async fn insert_link(&mut self, row: &NewLink) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Abstract storage backend for Claim Harness.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`fetch_document`](ClaimStore::fetch_document) | Load a document by id, else by entry id |
/// | [`begin`](ClaimStore::begin) | Open the write transaction for one document |
/// | [`active_claims`](ClaimStore::active_claims) | List non-superseded claims of an entry |
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// `document_id` takes precedence; `None` when neither id matches.
    async fn fetch_document(
        &self,
        entry_id: Option<&str>,
        document_id: Option<&str>,
    ) -> Result<Option<Document>>;

    async fn begin(&self) -> Result<Box<dyn ClaimTx>>;

    async fn active_claims(&self, entry_id: &str) -> Result<Vec<StoredClaim>>;
}

/// Options for [`persist_bundle`].
#[derive(Debug, Clone)]
pub struct PersistOptions {
    pub extraction_id: String,
    pub extractor_version: String,
    /// Supersede the entry's active claims before inserting.
    pub replace_existing: bool,
    /// Count as if writing, but issue no writes.
    pub dry_run: bool,
}

/// Row counts reported by [`persist_bundle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistCounts {
    pub claims_inserted: u64,
    pub evidence_inserted: u64,
    pub entities_upserted: u64,
    pub links_inserted: u64,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn resolve_entity(
    tx: &mut dyn ClaimTx,
    entity_type: EntityType,
    name: &str,
    dry_run: bool,
) -> Result<String> {
    if let Some(id) = tx.find_entity(entity_type, name).await? {
        return Ok(id);
    }
    let id = new_id();
    if !dry_run {
        tx.insert_entity(&id, entity_type, name).await?;
    }
    Ok(id)
}

/// Write a gated bundle for `doc` inside `tx`.
///
/// Replace is two-phase: old claims are superseded first, then new ones
/// inserted, both in the caller's transaction. Dependent rows (evidence,
/// dimensions) are written only for claims whose own insert succeeded, and
/// links only between such claims.
pub async fn persist_bundle(
    tx: &mut dyn ClaimTx,
    doc: &Document,
    bundle: &ClaimBundle,
    opts: &PersistOptions,
) -> Result<PersistCounts> {
    let mut counts = PersistCounts::default();

    if opts.replace_existing && !opts.dry_run {
        let superseded = tx.supersede_claims(&doc.entry_id).await?;
        tracing::debug!(entry_id = %doc.entry_id, superseded, "superseded active claims");
    }

    let mut entity_ids: HashMap<&str, String> = HashMap::new();
    for entity in &bundle.entities {
        let entity_id = resolve_entity(tx, entity.entity_type, &entity.name, opts.dry_run).await?;
        counts.entities_upserted += 1;
        for alias in &entity.aliases {
            let normalized = normalize_alias(alias);
            if normalized.is_empty() || opts.dry_run {
                continue;
            }
            tx.insert_alias(&entity_id, alias, &normalized).await?;
        }
        entity_ids.insert(entity.name.as_str(), entity_id);
    }

    let mut claim_ids: HashMap<usize, String> = HashMap::new();
    for (idx, claim) in bundle.claims.iter().enumerate() {
        let lookup = |name: &Option<String>| {
            name.as_deref()
                .and_then(|n| entity_ids.get(n))
                .cloned()
        };
        let row = NewClaim {
            id: new_id(),
            document_id: doc.id.clone(),
            entry_id: doc.entry_id.clone(),
            extraction_id: opts.extraction_id.clone(),
            extractor_version: opts.extractor_version.clone(),
            subject_entity_id: lookup(&claim.subject_entity_name),
            object_entity_id: lookup(&claim.object_entity_name),
            claim: claim.clone(),
        };

        if opts.dry_run {
            counts.claims_inserted += 1;
            counts.evidence_inserted += claim.evidence_spans.len() as u64;
            claim_ids.insert(idx, row.id);
            continue;
        }
        if !tx.insert_claim(&row).await? {
            tracing::warn!(claim_id = %row.id, "claim insert ignored");
            continue;
        }
        counts.claims_inserted += 1;

        for dimension in &claim.dimensions {
            let mut normalized_value = normalize_alias(&dimension.dimension_value);
            if normalized_value.is_empty() {
                normalized_value = dimension.dimension_value.to_lowercase();
            }
            tx.insert_dimension(&NewDimension {
                id: new_id(),
                claim_id: row.id.clone(),
                dimension: dimension.clone(),
                normalized_value,
            })
            .await?;
        }

        for span in &claim.evidence_spans {
            let inserted = tx
                .insert_evidence(&NewEvidence {
                    id: new_id(),
                    claim_id: row.id.clone(),
                    document_id: doc.id.clone(),
                    span: span.clone(),
                })
                .await?;
            if inserted {
                counts.evidence_inserted += 1;
            }
        }
        claim_ids.insert(idx, row.id);
    }

    for link in &bundle.links {
        let (Some(from), Some(to)) = (
            claim_ids.get(&link.from_claim_index),
            claim_ids.get(&link.to_claim_index),
        ) else {
            continue;
        };
        if opts.dry_run {
            counts.links_inserted += 1;
            continue;
        }
        let inserted = tx
            .insert_link(&NewLink {
                id: new_id(),
                from_claim_id: from.clone(),
                to_claim_id: to.clone(),
                relation_type: link.relation_type,
                confidence: link.confidence,
            })
            .await?;
        if inserted {
            counts.links_inserted += 1;
        }
    }

    tracing::debug!(
        document_id = %doc.id,
        claims = counts.claims_inserted,
        evidence = counts.evidence_inserted,
        entities = counts.entities_upserted,
        links = counts.links_inserted,
        dry_run = opts.dry_run,
        "persisted claim bundle"
    );
    Ok(counts)
}
