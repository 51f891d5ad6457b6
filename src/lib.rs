//! # Claim Harness
//!
//! A local-first claim extraction and normalization engine for personal notes.
//!
//! Claim Harness turns free-form journal and memo text into atomic,
//! me-centric claims (subject, predicate, object, with modality, polarity,
//! certainty, time, evidence, and causal links) stored in SQLite. Text is
//! scored for sensitive content before it may reach an external model; a
//! rule-based extractor works entirely offline.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌────────────────┐   ┌──────────────┐
//! │ fact_docs  │──▶│ Redactor │──▶│ Model │ Rules  │──▶│  Normalizer  │
//! └────────────┘   └──────────┘   └────────────────┘   └──────┬───────┘
//!                                                             ▼
//!                                   ┌──────────┐   ┌──────────────────┐
//!                                   │  SQLite  │◀──│ Gate + Dedupe    │
//!                                   │  claims  │   └──────────────────┘
//!                                   └──────────┘
//! ```
//!
//! The pure pipeline stages live in `claim-harness-core`; this crate adds
//! configuration, the SQLite store, the model client, and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! clm init
//! clm doc add entry-1 --type journal --text "雨が降ったので予定を中止した"
//! clm extract --entry-id entry-1 --extractor rules
//! clm claims --entry-id entry-1
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite claim store |
//! | [`llm`] | Chat-completions model client |
//! | [`extract`] | One extraction attempt and its result payload |
//! | [`key_facts`] | Rule-derived key facts |
//! | [`error`] | Extraction failure taxonomy |
//! | [`commands`] | CLI command handlers |

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod key_facts;
pub mod llm;
pub mod migrate;
pub mod sqlite_store;
