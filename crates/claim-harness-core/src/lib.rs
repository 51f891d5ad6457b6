//! # Claim Harness Core
//!
//! Shared, runtime-free logic for Claim Harness: claim models, the redactor,
//! the rule extractor, the structured-output contract, the me-centric
//! normalizer, the quality gate, and the store abstraction.
//!
//! This crate contains no tokio, sqlx, network, or filesystem dependencies.
//! Everything here is deterministic and testable with plain values; the
//! application crate wires it to SQLite and the model API.
//!
//! ## Pipeline
//!
//! ```text
//! Document ──▶ redact ──▶ rules │ model+contract ──▶ normalize ──▶ gate ──▶ store
//! ```

/// Declares a lazily compiled, process-wide regex accessor.
macro_rules! static_regex {
    ($(#[$meta:meta])* $name:ident, $pattern:expr) => {
        $(#[$meta])*
        fn $name() -> &'static regex::Regex {
            static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
            RE.get_or_init(|| regex::Regex::new($pattern).expect("static pattern compiles"))
        }
    };
}

pub mod contract;
pub mod gate;
pub mod lexicon;
pub mod models;
pub mod normalize;
pub mod redact;
pub mod rules;
pub mod store;
pub mod text;
pub mod tokenizer;
