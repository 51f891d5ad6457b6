//! SQLite implementation of the [`ClaimStore`] trait.
//!
//! Each [`ClaimTx`] wraps one `sqlx` transaction. Every insert uses
//! `INSERT OR IGNORE` and reports success only when exactly one row was
//! written, so a retried extraction never duplicates rows.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use claim_harness_core::models::{Document, EntityType, RedactionState};
use claim_harness_core::store::{
    ClaimStore, ClaimTx, NewClaim, NewDimension, NewEvidence, NewLink, StoredClaim,
    STATUS_SUPERSEDED,
};

pub(crate) fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// SQLite-backed claim store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update the document for `entry_id`.
    ///
    /// Unchanged text (same content hash) leaves the row untouched. Changed
    /// text resets the redaction state so the next extraction rescans it.
    pub async fn upsert_document(
        &self,
        entry_id: &str,
        declared_type: &str,
        raw_text: &str,
        occurred_at: Option<&str>,
    ) -> Result<Document> {
        let hash = content_hash(raw_text);
        let now = now_iso();
        let existing = sqlx::query("SELECT id, content_hash FROM fact_documents WHERE entry_id = ?")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;

        let id = match existing {
            Some(row) => {
                let id: String = row.try_get("id")?;
                let old_hash: String = row.try_get("content_hash")?;
                if old_hash != hash {
                    sqlx::query(
                        r#"
                        UPDATE fact_documents
                        SET raw_text = ?, content_hash = ?, declared_type = ?, occurred_at = ?,
                            pii_score = 0, redaction_state = 'none', updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(raw_text)
                    .bind(&hash)
                    .bind(declared_type)
                    .bind(occurred_at)
                    .bind(&now)
                    .bind(&id)
                    .execute(&self.pool)
                    .await?;
                    tracing::info!(document_id = %id, entry_id, "document text changed");
                }
                id
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO fact_documents (
                        id, entry_id, declared_type, raw_text, content_hash, occurred_at,
                        created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(entry_id)
                .bind(declared_type)
                .bind(raw_text)
                .bind(&hash)
                .bind(occurred_at)
                .bind(&now)
                .bind(&now)
                .execute(&self.pool)
                .await?;
                tracing::info!(document_id = %id, entry_id, "document added");
                id
            }
        };

        self.fetch_document(None, Some(&id))
            .await?
            .ok_or_else(|| anyhow::anyhow!("document {} vanished after upsert", id))
    }

    /// Count claims for `entry_id` by status.
    pub async fn claim_status_counts(&self, entry_id: &str) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(SUM(CASE WHEN status = ? THEN 1 ELSE 0 END), 0) AS superseded
            FROM fact_claims
            WHERE entry_id = ?
            "#,
        )
        .bind(STATUS_SUPERSEDED)
        .bind(entry_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("active")?, row.try_get("superseded")?))
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let state: String = row.try_get("redaction_state")?;
    Ok(Document {
        id: row.try_get("id")?,
        entry_id: row.try_get("entry_id")?,
        raw_text: row.try_get("raw_text")?,
        declared_type: row.try_get("declared_type")?,
        occurred_at: row.try_get("occurred_at")?,
        pii_score: row.try_get("pii_score")?,
        redaction_state: state.parse::<RedactionState>()?,
    })
}

#[async_trait]
impl ClaimStore for SqliteStore {
    async fn fetch_document(
        &self,
        entry_id: Option<&str>,
        document_id: Option<&str>,
    ) -> Result<Option<Document>> {
        let (sql, key) = match (document_id, entry_id) {
            (Some(id), _) => (
                "SELECT id, entry_id, raw_text, declared_type, occurred_at, pii_score, \
                 redaction_state FROM fact_documents WHERE id = ? LIMIT 1",
                id,
            ),
            (None, Some(entry_id)) => (
                "SELECT id, entry_id, raw_text, declared_type, occurred_at, pii_score, \
                 redaction_state FROM fact_documents WHERE entry_id = ? LIMIT 1",
                entry_id,
            ),
            (None, None) => return Ok(None),
        };
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn begin(&self) -> Result<Box<dyn ClaimTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn active_claims(&self, entry_id: &str) -> Result<Vec<StoredClaim>> {
        let rows = sqlx::query(
            r#"
            SELECT id, entry_id, subject_text, predicate, object_text_canonical,
                   modality, certainty, status, extraction_id
            FROM fact_claims
            WHERE entry_id = ? AND deleted_at IS NULL
            ORDER BY created_at, rowid
            "#,
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StoredClaim {
                    id: row.try_get("id")?,
                    entry_id: row.try_get("entry_id")?,
                    subject_text: row.try_get("subject_text")?,
                    predicate: row.try_get("predicate")?,
                    object_text_canonical: row.try_get("object_text_canonical")?,
                    modality: row.try_get("modality")?,
                    certainty: row.try_get("certainty")?,
                    status: row.try_get("status")?,
                    extraction_id: row.try_get("extraction_id")?,
                })
            })
            .collect()
    }
}

struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ClaimTx for SqliteTx {
    async fn update_redaction(
        &mut self,
        document_id: &str,
        pii_score: f64,
        state: RedactionState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE fact_documents SET pii_score = ?, redaction_state = ?, updated_at = ? WHERE id = ?",
        )
        .bind(pii_score)
        .bind(state.as_str())
        .bind(now_iso())
        .bind(document_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_entity(&mut self, entity_type: EntityType, name: &str) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM fact_entities WHERE entity_type = ? AND canonical_name = ? LIMIT 1",
        )
        .bind(entity_type.as_str())
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn insert_entity(&mut self, id: &str, entity_type: EntityType, name: &str) -> Result<()> {
        let now = now_iso();
        sqlx::query(
            r#"
            INSERT INTO fact_entities (id, entity_type, canonical_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(entity_type.as_str())
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_alias(&mut self, entity_id: &str, alias: &str, normalized: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO fact_entity_aliases (
                id, entity_id, alias, normalized_alias, created_at
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(entity_id)
        .bind(alias)
        .bind(normalized)
        .bind(now_iso())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn supersede_claims(&mut self, entry_id: &str) -> Result<u64> {
        let now = now_iso();
        let result = sqlx::query(
            r#"
            UPDATE fact_claims
            SET deleted_at = ?, updated_at = ?, status = ?
            WHERE entry_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(STATUS_SUPERSEDED)
        .bind(entry_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_claim(&mut self, row: &NewClaim) -> Result<bool> {
        let now = now_iso();
        let claim = &row.claim;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO fact_claims (
                id, document_id, entry_id, subject_text, subject_entity_id,
                predicate, object_text_raw, object_text_canonical, object_entity_id, me_role,
                modality, polarity, certainty, time_start_utc, time_end_utc,
                status, extraction_id, extractor_version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.document_id)
        .bind(&row.entry_id)
        .bind(&claim.subject_text)
        .bind(&row.subject_entity_id)
        .bind(claim.predicate.as_str())
        .bind(&claim.object_text_raw)
        .bind(&claim.object_text_canonical)
        .bind(&row.object_entity_id)
        .bind(claim.me_role.as_str())
        .bind(claim.modality.as_str())
        .bind(claim.polarity.as_str())
        .bind(claim.certainty)
        .bind(&claim.time_start_utc)
        .bind(&claim.time_end_utc)
        .bind(&row.extraction_id)
        .bind(&row.extractor_version)
        .bind(&now)
        .bind(&now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_evidence(&mut self, row: &NewEvidence) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO fact_evidence_spans (
                id, claim_id, document_id, char_start, char_end, excerpt, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.claim_id)
        .bind(&row.document_id)
        .bind(row.span.char_start.map(i64::from))
        .bind(row.span.char_end.map(i64::from))
        .bind(&row.span.excerpt)
        .bind(now_iso())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_dimension(&mut self, row: &NewDimension) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO fact_claim_dimensions (
                id, claim_id, dimension_type, dimension_value, normalized_value,
                confidence, source, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.claim_id)
        .bind(row.dimension.dimension_type.as_str())
        .bind(&row.dimension.dimension_value)
        .bind(&row.normalized_value)
        .bind(row.dimension.confidence)
        .bind(row.dimension.source.as_str())
        .bind(now_iso())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_link(&mut self, row: &NewLink) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO fact_claim_links (
                id, from_claim_id, to_claim_id, relation_type, confidence, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.from_claim_id)
        .bind(&row.to_claim_id)
        .bind(row.relation_type.as_str())
        .bind(row.confidence)
        .bind(now_iso())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable_hex() {
        let a = content_hash("雨で解散した");
        assert_eq!(a.len(), 64);
        assert_eq!(a, content_hash("雨で解散した"));
        assert_ne!(a, content_hash("雨で解散"));
    }
}
