//! In-memory [`ClaimStore`] implementation for testing.
//!
//! State lives behind `Arc<std::sync::RwLock<_>>`. A transaction works on a
//! private copy of the state and swaps it in on commit, so rollback (or
//! dropping the transaction) leaves the store untouched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Document, EntityType, RedactionState};

use super::{
    ClaimStore, ClaimTx, NewClaim, NewDimension, NewEvidence, NewLink, StoredClaim,
    STATUS_ACTIVE, STATUS_SUPERSEDED,
};

#[derive(Clone)]
struct StoredClaimRow {
    row: NewClaim,
    status: &'static str,
}

#[derive(Clone, Default)]
struct MemoryState {
    documents: HashMap<String, Document>,
    claims: Vec<StoredClaimRow>,
    evidence: HashMap<String, NewEvidence>,
    dimensions: HashMap<String, NewDimension>,
    links: HashMap<String, NewLink>,
    entities: HashMap<String, (EntityType, String)>,
    aliases: HashSet<(String, String)>,
}

/// In-memory store for tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

/// Row counts, for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub claims: usize,
    pub evidence: usize,
    pub dimensions: usize,
    pub links: usize,
    pub entities: usize,
    pub aliases: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|_| anyhow!("memory store lock poisoned"))
    }

    /// Seed a document, replacing any with the same id.
    pub fn insert_document(&self, doc: Document) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        state.documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    pub fn counts(&self) -> Result<TableCounts> {
        let state = self.read()?;
        Ok(TableCounts {
            claims: state.claims.len(),
            evidence: state.evidence.len(),
            dimensions: state.dimensions.len(),
            links: state.links.len(),
            entities: state.entities.len(),
            aliases: state.aliases.len(),
        })
    }

    /// Normalized values of every stored dimension.
    pub fn dimension_values(&self) -> Result<Vec<String>> {
        let state = self.read()?;
        Ok(state
            .dimensions
            .values()
            .map(|d| d.normalized_value.clone())
            .collect())
    }
}

#[async_trait]
impl ClaimStore for InMemoryStore {
    async fn fetch_document(
        &self,
        entry_id: Option<&str>,
        document_id: Option<&str>,
    ) -> Result<Option<Document>> {
        let state = self.read()?;
        if let Some(id) = document_id {
            return Ok(state.documents.get(id).cloned());
        }
        if let Some(entry_id) = entry_id {
            return Ok(state
                .documents
                .values()
                .find(|d| d.entry_id == entry_id)
                .cloned());
        }
        Ok(None)
    }

    async fn begin(&self) -> Result<Box<dyn ClaimTx>> {
        let staged = self.read()?.clone();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.state),
            staged,
        }))
    }

    async fn active_claims(&self, entry_id: &str) -> Result<Vec<StoredClaim>> {
        let state = self.read()?;
        Ok(state
            .claims
            .iter()
            .filter(|c| c.row.entry_id == entry_id && c.status == STATUS_ACTIVE)
            .map(|c| StoredClaim {
                id: c.row.id.clone(),
                entry_id: c.row.entry_id.clone(),
                subject_text: c.row.claim.subject_text.clone(),
                predicate: c.row.claim.predicate.to_string(),
                object_text_canonical: c.row.claim.object_text_canonical.clone(),
                modality: c.row.claim.modality.to_string(),
                certainty: c.row.claim.certainty,
                status: c.status.to_string(),
                extraction_id: c.row.extraction_id.clone(),
            })
            .collect())
    }
}

struct MemoryTx {
    shared: Arc<RwLock<MemoryState>>,
    staged: MemoryState,
}

#[async_trait]
impl ClaimTx for MemoryTx {
    async fn update_redaction(
        &mut self,
        document_id: &str,
        pii_score: f64,
        state: RedactionState,
    ) -> Result<()> {
        if let Some(doc) = self.staged.documents.get_mut(document_id) {
            doc.pii_score = pii_score;
            doc.redaction_state = state;
        }
        Ok(())
    }

    async fn find_entity(&mut self, entity_type: EntityType, name: &str) -> Result<Option<String>> {
        Ok(self
            .staged
            .entities
            .iter()
            .find(|(_, (t, n))| *t == entity_type && n == name)
            .map(|(id, _)| id.clone()))
    }

    async fn insert_entity(&mut self, id: &str, entity_type: EntityType, name: &str) -> Result<()> {
        self.staged
            .entities
            .insert(id.to_string(), (entity_type, name.to_string()));
        Ok(())
    }

    async fn insert_alias(&mut self, entity_id: &str, _alias: &str, normalized: &str) -> Result<bool> {
        Ok(self
            .staged
            .aliases
            .insert((entity_id.to_string(), normalized.to_string())))
    }

    async fn supersede_claims(&mut self, entry_id: &str) -> Result<u64> {
        let mut touched = 0;
        for claim in self.staged.claims.iter_mut() {
            if claim.row.entry_id == entry_id && claim.status == STATUS_ACTIVE {
                claim.status = STATUS_SUPERSEDED;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn insert_claim(&mut self, row: &NewClaim) -> Result<bool> {
        if self.staged.claims.iter().any(|c| c.row.id == row.id) {
            return Ok(false);
        }
        self.staged.claims.push(StoredClaimRow {
            row: row.clone(),
            status: STATUS_ACTIVE,
        });
        Ok(true)
    }

    async fn insert_evidence(&mut self, row: &NewEvidence) -> Result<bool> {
        if self.staged.evidence.contains_key(&row.id) {
            return Ok(false);
        }
        self.staged.evidence.insert(row.id.clone(), row.clone());
        Ok(true)
    }

    async fn insert_dimension(&mut self, row: &NewDimension) -> Result<bool> {
        if self.staged.dimensions.contains_key(&row.id) {
            return Ok(false);
        }
        self.staged.dimensions.insert(row.id.clone(), row.clone());
        Ok(true)
    }

    async fn insert_link(&mut self, row: &NewLink) -> Result<bool> {
        if self.staged.links.contains_key(&row.id) {
            return Ok(false);
        }
        self.staged.links.insert(row.id.clone(), row.clone());
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { shared, staged } = *self;
        let mut state = shared
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        *state = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
