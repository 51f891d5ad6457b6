//! Idempotent schema creation for the claim tables.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS fact_documents (
        id TEXT PRIMARY KEY,
        entry_id TEXT NOT NULL UNIQUE,
        declared_type TEXT NOT NULL DEFAULT 'memo',
        raw_text TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        occurred_at TEXT,
        pii_score REAL NOT NULL DEFAULT 0,
        redaction_state TEXT NOT NULL DEFAULT 'none',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fact_entities (
        id TEXT PRIMARY KEY,
        entity_type TEXT NOT NULL,
        canonical_name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(entity_type, canonical_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fact_entity_aliases (
        id TEXT PRIMARY KEY,
        entity_id TEXT NOT NULL,
        alias TEXT NOT NULL,
        normalized_alias TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(entity_id, normalized_alias),
        FOREIGN KEY (entity_id) REFERENCES fact_entities(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fact_claims (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        entry_id TEXT NOT NULL,
        subject_text TEXT NOT NULL,
        subject_entity_id TEXT,
        predicate TEXT NOT NULL,
        object_text_raw TEXT NOT NULL,
        object_text_canonical TEXT NOT NULL,
        object_entity_id TEXT,
        me_role TEXT NOT NULL,
        modality TEXT NOT NULL,
        polarity TEXT NOT NULL,
        certainty REAL NOT NULL,
        time_start_utc TEXT,
        time_end_utc TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        extraction_id TEXT NOT NULL,
        extractor_version TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT,
        FOREIGN KEY (document_id) REFERENCES fact_documents(id),
        FOREIGN KEY (subject_entity_id) REFERENCES fact_entities(id),
        FOREIGN KEY (object_entity_id) REFERENCES fact_entities(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_fact_claims_entry ON fact_claims(entry_id, deleted_at)",
    r#"
    CREATE TABLE IF NOT EXISTS fact_evidence_spans (
        id TEXT PRIMARY KEY,
        claim_id TEXT NOT NULL,
        document_id TEXT NOT NULL,
        char_start INTEGER,
        char_end INTEGER,
        excerpt TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (claim_id) REFERENCES fact_claims(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fact_claim_dimensions (
        id TEXT PRIMARY KEY,
        claim_id TEXT NOT NULL,
        dimension_type TEXT NOT NULL,
        dimension_value TEXT NOT NULL,
        normalized_value TEXT NOT NULL,
        confidence REAL NOT NULL,
        source TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (claim_id) REFERENCES fact_claims(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fact_claim_links (
        id TEXT PRIMARY KEY,
        from_claim_id TEXT NOT NULL,
        to_claim_id TEXT NOT NULL,
        relation_type TEXT NOT NULL,
        confidence REAL NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (from_claim_id) REFERENCES fact_claims(id),
        FOREIGN KEY (to_claim_id) REFERENCES fact_claims(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS key_facts (
        id TEXT PRIMARY KEY,
        source_type TEXT NOT NULL,
        source_id TEXT NOT NULL,
        subject TEXT NOT NULL,
        predicate TEXT NOT NULL,
        object_text TEXT NOT NULL,
        object_type TEXT NOT NULL,
        object_json TEXT,
        evidence_excerpt TEXT,
        occurred_at TEXT,
        confidence REAL NOT NULL,
        extractor_version TEXT NOT NULL,
        created_at TEXT NOT NULL,
        deleted_at TEXT
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_key_facts_active_triple
    ON key_facts(source_type, source_id, subject, predicate, object_text)
    WHERE deleted_at IS NULL
    "#,
];

/// Create every table and index on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    tracing::info!(path = %config.db.path.display(), "schema ready");
    Ok(())
}
