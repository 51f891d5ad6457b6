//! Command handlers behind the `clm` binary.
//!
//! Each handler owns its pool and prints its result as JSON on stdout.
//! Logs go to stderr, so stdout stays machine-readable.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use claim_harness_core::models::{NoteRecord, TaskRecord};
use claim_harness_core::redact::redact_for_model;
use claim_harness_core::store::ClaimStore;
use claim_harness_core::tokenizer::create_tokenizer;

use crate::config::Config;
use crate::db;
use crate::extract::{run_extraction, ExtractRequest, Pipeline};
use crate::key_facts::{store_key_facts, FactSource};
use crate::llm::create_model;
use crate::sqlite_store::SqliteStore;

/// Inline text, or the contents of `file`. Exactly one must be given.
pub fn read_text(text: Option<String>, file: Option<&Path>) -> Result<String> {
    match (text, file) {
        (Some(text), None) => Ok(text),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (Some(_), Some(_)) => bail!("Pass either --text or --file, not both"),
        (None, None) => bail!("One of --text or --file is required"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub async fn run_doc_add(
    config: &Config,
    entry_id: &str,
    declared_type: &str,
    text: &str,
    occurred_at: Option<&str>,
) -> Result<()> {
    if text.trim().is_empty() {
        bail!("Document text is empty");
    }
    let store = SqliteStore::new(db::connect(config).await?);
    let doc = store
        .upsert_document(entry_id, declared_type, text, occurred_at)
        .await?;
    print_json(&doc)?;
    store.pool().close().await;
    Ok(())
}

pub fn run_redact(text: &str) -> Result<()> {
    print_json(&redact_for_model(text))
}

/// Run one extraction and print its outcome.
///
/// Fails only when the outcome breaks its own contract; extraction errors
/// are reported inside the payload.
pub async fn run_extract(config: &Config, req: &ExtractRequest) -> Result<()> {
    if req.entry_id.is_none() && req.document_id.is_none() {
        bail!("One of --entry-id or --document-id is required");
    }
    let tokenizer = create_tokenizer(&config.tokenizer.provider)?;
    let lexicon = config.extract.lexicon()?;
    let model = create_model(&config.llm)?;
    let store = SqliteStore::new(db::connect(config).await?);

    let pipeline = Pipeline {
        config,
        tokenizer: tokenizer.as_ref(),
        lexicon: &lexicon,
        model: model.as_ref(),
    };
    let outcome = run_extraction(&store, &pipeline, req).await;
    store.pool().close().await;

    outcome.check_contract()?;
    print_json(&outcome)
}

/// Where `clm facts` reads its records from.
#[derive(Debug, Clone)]
pub enum FactInput {
    Entry(String),
    Notes(PathBuf),
    Tasks(PathBuf),
}

fn read_records<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records in {}", path.display()))
}

pub async fn run_facts(config: &Config, input: FactInput, replace: bool) -> Result<()> {
    let tokenizer = create_tokenizer(&config.tokenizer.provider)?;
    let lexicon = config.extract.lexicon()?;
    let store = SqliteStore::new(db::connect(config).await?);

    let sources: Vec<FactSource> = match input {
        FactInput::Entry(entry_id) => {
            let doc = store
                .fetch_document(Some(&entry_id), None)
                .await?
                .with_context(|| format!("No document for entry '{}'", entry_id))?;
            vec![FactSource::Document(doc)]
        }
        FactInput::Notes(path) => read_records::<NoteRecord>(&path)?
            .into_iter()
            .map(FactSource::Note)
            .collect(),
        FactInput::Tasks(path) => read_records::<TaskRecord>(&path)?
            .into_iter()
            .map(FactSource::Task)
            .collect(),
    };

    for source in &sources {
        let counts = store_key_facts(
            store.pool(),
            source,
            tokenizer.as_ref(),
            &lexicon,
            config.extract.max_facts_per_item,
            config.extract.min_confidence,
            replace,
        )
        .await?;
        print_json(&counts)?;
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_claims(config: &Config, entry_id: &str) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    for claim in store.active_claims(entry_id).await? {
        print_json(&claim)?;
    }
    store.pool().close().await;
    Ok(())
}
