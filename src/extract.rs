//! One extraction attempt for one document.
//!
//! [`run_extraction`] drives the whole pipeline inside a single store
//! transaction:
//!
//! ```text
//! fetch ──▶ redact ──▶ model │ rules ──▶ normalize ──▶ gate ──▶ dedupe ──▶ persist ──▶ commit
//! ```
//!
//! Every outcome, including failures, is reported as an
//! [`ExtractionOutcome`], the JSON payload `clm extract` prints:
//!
//! | Status | When | Transaction |
//! |--------|------|-------------|
//! | `succeeded` | claims persisted | committed (rolled back on dry run) |
//! | `blocked` | high-risk text with the model extractor | committed (redaction state only) |
//! | `queued` | any retryable failure | rolled back |
//! | `failed` | no transaction could be opened | none |

use anyhow::{bail, Result};
use serde::Serialize;

use claim_harness_core::gate::{apply_quality_gate, dedupe_claims};
use claim_harness_core::lexicon::Lexicon;
use claim_harness_core::models::{ClaimBundle, Document, RiskLevel};
use claim_harness_core::normalize::normalize_to_me_centric;
use claim_harness_core::redact::redact_for_model;
use claim_harness_core::rules::{RuleExtractor, EXTRACTOR_VERSION as RULES_EXTRACTOR_VERSION};
use claim_harness_core::store::{persist_bundle, ClaimStore, ClaimTx, PersistCounts, PersistOptions};
use claim_harness_core::tokenizer::Tokenizer;

use crate::config::Config;
use crate::error::{ExtractError, BLOCKED_SENSITIVE};
use crate::llm::ClaimModel;

pub const WORKER_NAME: &str = "extract-claims-llm-v1";
pub const CONTRACT_VERSION: &str = "1.0";

/// Quality flags reported on success.
const MAX_REPORTED_FLAGS: usize = 5;

/// Which extractor produces the raw bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Extractor {
    /// External model through the structured-output contract.
    Llm,
    /// Local rule extractor; text never leaves the machine.
    Rules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Succeeded,
    Blocked,
    Queued,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub entry_id: Option<String>,
    pub document_id: Option<String>,
    /// Generated when absent.
    pub extraction_id: Option<String>,
    pub job_id: Option<String>,
    pub job_item_id: Option<String>,
    pub attempt_count: u32,
    pub replace_existing: bool,
    pub dry_run: bool,
    pub extractor: Extractor,
}

impl ExtractRequest {
    pub fn for_entry(entry_id: impl Into<String>, extractor: Extractor) -> Self {
        Self {
            entry_id: Some(entry_id.into()),
            document_id: None,
            extraction_id: None,
            job_id: None,
            job_item_id: None,
            attempt_count: 1,
            replace_existing: false,
            dry_run: false,
            extractor,
        }
    }
}

/// Result payload of one extraction attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutcome {
    pub worker: &'static str,
    pub contract_version: &'static str,
    pub job_id: Option<String>,
    pub job_item_id: Option<String>,
    pub extraction_id: String,
    pub entry_id: Option<String>,
    pub document_id: Option<String>,
    pub extractor: Extractor,
    pub status: ExtractionStatus,
    #[serde(flatten)]
    pub counts: PersistCounts,
    pub request_tokens_in: u64,
    pub request_tokens_out: u64,
    pub request_cost_usd: f64,
    pub error_code: Option<&'static str>,
    pub attempt_count: u32,
    pub next_retry_at: Option<String>,
    pub error: Option<String>,
    pub dry_run: bool,
}

impl ExtractionOutcome {
    fn start(req: &ExtractRequest) -> Self {
        Self {
            worker: WORKER_NAME,
            contract_version: CONTRACT_VERSION,
            job_id: req.job_id.clone(),
            job_item_id: req.job_item_id.clone(),
            extraction_id: req
                .extraction_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            entry_id: req.entry_id.clone(),
            document_id: req.document_id.clone(),
            extractor: req.extractor,
            status: ExtractionStatus::Failed,
            counts: PersistCounts::default(),
            request_tokens_in: 0,
            request_tokens_out: 0,
            request_cost_usd: 0.0,
            error_code: None,
            attempt_count: req.attempt_count.max(1),
            next_retry_at: None,
            error: None,
            dry_run: req.dry_run,
        }
    }

    /// Check the payload's own consistency rules.
    pub fn check_contract(&self) -> Result<()> {
        match self.status {
            ExtractionStatus::Succeeded => {
                if self.error_code.is_some() {
                    bail!("succeeded outcome carries error_code {:?}", self.error_code);
                }
                if self.next_retry_at.is_some() {
                    bail!("succeeded outcome carries next_retry_at");
                }
            }
            ExtractionStatus::Blocked => {
                if self.error_code != Some(BLOCKED_SENSITIVE) {
                    bail!("blocked outcome must carry error_code {}", BLOCKED_SENSITIVE);
                }
                if self.counts != PersistCounts::default() {
                    bail!("blocked outcome reports inserted rows");
                }
            }
            ExtractionStatus::Queued => {
                if self.error_code.is_none() {
                    bail!("queued outcome is missing error_code");
                }
                if self.next_retry_at.is_none() {
                    bail!("queued outcome is missing next_retry_at");
                }
                if self.counts != PersistCounts::default() {
                    bail!("queued outcome reports inserted rows");
                }
            }
            ExtractionStatus::Failed => {
                if self.error.is_none() {
                    bail!("failed outcome is missing error");
                }
            }
        }
        if self.attempt_count == 0 {
            bail!("attempt_count must be >= 1");
        }
        if self.worker != WORKER_NAME || self.contract_version != CONTRACT_VERSION {
            bail!("unexpected worker identity");
        }
        Ok(())
    }
}

/// Collaborators shared by every extraction in a process.
pub struct Pipeline<'a> {
    pub config: &'a Config,
    pub tokenizer: &'a dyn Tokenizer,
    pub lexicon: &'a Lexicon,
    pub model: &'a dyn ClaimModel,
}

struct Processed {
    counts: PersistCounts,
    quality_flags: Vec<String>,
}

fn retry_at(delay_secs: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::seconds(delay_secs))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Run one extraction attempt. Never fails; failures are encoded in the
/// returned outcome.
pub async fn run_extraction(
    store: &dyn ClaimStore,
    pipeline: &Pipeline<'_>,
    req: &ExtractRequest,
) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::start(req);

    match attempt(store, pipeline, req, &mut outcome).await {
        Ok(Processed {
            counts,
            quality_flags,
        }) => {
            outcome.status = ExtractionStatus::Succeeded;
            outcome.counts = counts;
            if !quality_flags.is_empty() {
                let reported: Vec<&str> = quality_flags
                    .iter()
                    .take(MAX_REPORTED_FLAGS)
                    .map(String::as_str)
                    .collect();
                outcome.error = Some(reported.join(","));
            }
            tracing::info!(
                extraction_id = %outcome.extraction_id,
                claims = counts.claims_inserted,
                evidence = counts.evidence_inserted,
                entities = counts.entities_upserted,
                links = counts.links_inserted,
                dry_run = req.dry_run,
                "extraction succeeded"
            );
        }
        Err(Failure::NoTransaction(e)) => {
            outcome.status = ExtractionStatus::Failed;
            outcome.error = Some(format!("{:#}", e));
            tracing::error!(extraction_id = %outcome.extraction_id, error = %e, "could not open transaction");
        }
        Err(Failure::Attempt(e)) if !e.is_retryable() => {
            outcome.status = ExtractionStatus::Blocked;
            outcome.error_code = Some(e.error_code());
            outcome.error = Some(e.to_string());
            tracing::warn!(
                extraction_id = %outcome.extraction_id,
                entry_id = outcome.entry_id.as_deref().unwrap_or("-"),
                "document blocked by redactor"
            );
        }
        Err(Failure::Attempt(e)) => {
            outcome.status = ExtractionStatus::Queued;
            outcome.error_code = Some(e.error_code());
            outcome.next_retry_at = Some(retry_at(pipeline.config.retry.delay_secs));
            outcome.error = Some(e.to_string());
            tracing::warn!(
                extraction_id = %outcome.extraction_id,
                timeout = e.is_timeout(),
                error = %e,
                "extraction queued for retry"
            );
        }
    }

    outcome
}

enum Failure {
    NoTransaction(anyhow::Error),
    Attempt(ExtractError),
}

impl From<ExtractError> for Failure {
    fn from(e: ExtractError) -> Self {
        Failure::Attempt(e)
    }
}

async fn attempt(
    store: &dyn ClaimStore,
    pipeline: &Pipeline<'_>,
    req: &ExtractRequest,
    outcome: &mut ExtractionOutcome,
) -> Result<Processed, Failure> {
    let doc = store
        .fetch_document(req.entry_id.as_deref(), req.document_id.as_deref())
        .await
        .map_err(ExtractError::from)?
        .ok_or(ExtractError::DocumentNotFound)?;
    outcome.entry_id = Some(doc.entry_id.clone());
    outcome.document_id = Some(doc.id.clone());

    let mut tx = store.begin().await.map_err(Failure::NoTransaction)?;

    match process(tx.as_mut(), pipeline, req, &doc, outcome).await {
        Ok(processed) => {
            let keep = !req.dry_run;
            let finished = if keep { tx.commit().await } else { tx.rollback().await };
            finished.map_err(ExtractError::from)?;
            Ok(processed)
        }
        // A blocked document keeps its recorded redaction state.
        Err(e) if !e.is_retryable() => {
            let finished = if req.dry_run { tx.rollback().await } else { tx.commit().await };
            finished.map_err(ExtractError::from)?;
            Err(e.into())
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(document_id = %doc.id, error = %rollback_err, "rollback failed");
            }
            Err(e.into())
        }
    }
}

async fn process(
    tx: &mut dyn ClaimTx,
    pipeline: &Pipeline<'_>,
    req: &ExtractRequest,
    doc: &Document,
    outcome: &mut ExtractionOutcome,
) -> Result<Processed, ExtractError> {
    let config = pipeline.config;

    let redaction = redact_for_model(&doc.raw_text);
    let effective_score = doc.pii_score.max(redaction.pii_score);
    if !req.dry_run {
        tx.update_redaction(&doc.id, effective_score, redaction.redaction_state)
            .await?;
    }
    tracing::debug!(
        document_id = %doc.id,
        pii_score = effective_score,
        risk = %redaction.risk_level,
        "redaction scored"
    );

    let (bundle, extractor_version): (ClaimBundle, String) = match req.extractor {
        Extractor::Llm => {
            if redaction.risk_level == RiskLevel::High {
                return Err(ExtractError::BlockedSensitive);
            }
            let response = pipeline
                .model
                .extract_claims(doc, &redaction.llm_text)
                .await?;
            outcome.request_tokens_in = response.usage.input_tokens;
            outcome.request_tokens_out = response.usage.output_tokens;
            outcome.request_cost_usd = response.usage.request_cost_usd;
            (
                response.bundle,
                format!("llm-{}", pipeline.model.model_name()),
            )
        }
        Extractor::Rules => {
            let extractor = RuleExtractor::new(
                pipeline.lexicon,
                pipeline.tokenizer,
                config.extract.max_facts_per_item,
            );
            (
                extractor.claims_from_document(doc),
                RULES_EXTRACTOR_VERSION.to_string(),
            )
        }
    };

    let normalized = normalize_to_me_centric(
        bundle,
        &doc.raw_text,
        doc.occurred_at.as_deref(),
        &config.extract.normalizer(),
    );
    let gated = apply_quality_gate(normalized);
    if gated.claims.is_empty() {
        return Err(ExtractError::QualityGateRejectedAll);
    }
    let bundle = dedupe_claims(
        gated,
        pipeline.tokenizer,
        pipeline.lexicon,
        config.extract.max_claims,
    );

    let opts = PersistOptions {
        extraction_id: outcome.extraction_id.clone(),
        extractor_version,
        replace_existing: req.replace_existing,
        dry_run: req.dry_run,
    };
    let counts = persist_bundle(tx, doc, &bundle, &opts).await?;

    Ok(Processed {
        counts,
        quality_flags: bundle.quality_flags,
    })
}
