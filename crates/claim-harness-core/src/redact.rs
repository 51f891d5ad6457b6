//! Safety gate deciding what text may leave the system.
//!
//! [`redact_for_model`] scores a text for sensitive content and produces the
//! model-safe form:
//!
//! | Family | Pattern | Score |
//! |--------|---------|-------|
//! | secret token | `sk-` + 20 or more alphanumerics | 0.95 |
//! | secret assignment | `api_key`/`secret`/`token`/`password`/`passwd` `:`/`=` 12+ chars | 0.95 |
//! | postal code | `ddd-dddd` | 0.70 |
//! | phone | 10+ digit-like characters | 0.65 |
//! | email | `local@domain.tld` | 0.55 |
//!
//! The highest matching score wins (capped at 1.0). High risk blocks the
//! text entirely, medium risk masks every match with same-length `█` filler,
//! and low risk passes the text through unchanged.

use serde::Serialize;

use crate::models::{RedactionState, RiskLevel};

static_regex!(secret_token_re, r"\bsk-[A-Za-z0-9]{20,}\b");
static_regex!(
    secret_assignment_re,
    r#"(?i)\b(?:api[_-]?key|secret|token|password|passwd)\b\s*[:=]\s*['"]?[A-Za-z0-9_\-]{12,}"#
);
static_regex!(
    email_re,
    r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b"
);
static_regex!(phone_re, r"\+?\d[\d\-\s()]{8,}\d");
static_regex!(postal_re, r"\b\d{3}-\d{4}\b");

const SECRET_SCORE: f64 = 0.95;
const EMAIL_SCORE: f64 = 0.55;
const PHONE_SCORE: f64 = 0.65;
const POSTAL_SCORE: f64 = 0.70;

const HIGH_THRESHOLD: f64 = 0.90;
const MEDIUM_THRESHOLD: f64 = 0.50;

const MASK: char = '█';

/// Result of redacting one text. Read-only; only the score and state are
/// written back to the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactionResult {
    pub original_text: String,
    /// Text that may be sent to an external model. Empty when blocked.
    pub llm_text: String,
    pub pii_score: f64,
    pub risk_level: RiskLevel,
    pub redaction_state: RedactionState,
}

/// Map a score to its risk level.
pub fn risk_for_score(score: f64) -> RiskLevel {
    if score >= HIGH_THRESHOLD {
        RiskLevel::High
    } else if score >= MEDIUM_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Highest pattern score found in `text`, capped at 1.0.
pub fn pii_score(text: &str) -> f64 {
    let families: [(&regex::Regex, f64); 5] = [
        (secret_token_re(), SECRET_SCORE),
        (secret_assignment_re(), SECRET_SCORE),
        (email_re(), EMAIL_SCORE),
        (phone_re(), PHONE_SCORE),
        (postal_re(), POSTAL_SCORE),
    ];
    families
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, score)| *score)
        .fold(0.0, f64::max)
        .min(1.0)
}

/// Replace every match with filler of the same character length.
///
/// Families are applied in order: secrets, email, phone, postal.
pub fn mask_sensitive(text: &str) -> String {
    let mut out = text.to_string();
    for re in [
        secret_token_re(),
        secret_assignment_re(),
        email_re(),
        phone_re(),
        postal_re(),
    ] {
        out = re
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                MASK.to_string().repeat(caps[0].chars().count())
            })
            .into_owned();
    }
    out
}

/// Score, classify, and produce the model-safe form of `text`.
pub fn redact_for_model(text: &str) -> RedactionResult {
    let score = pii_score(text);
    let risk_level = risk_for_score(score);
    let (llm_text, redaction_state) = match risk_level {
        RiskLevel::High => (String::new(), RedactionState::Blocked),
        RiskLevel::Medium => (mask_sensitive(text), RedactionState::Masked),
        RiskLevel::Low => (text.to_string(), RedactionState::Clear),
    };
    RedactionResult {
        original_text: text.to_string(),
        llm_text,
        pii_score: score,
        risk_level,
        redaction_state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_assignment_blocks() {
        let r = redact_for_model("api_key: abcdefghijklmnop1234");
        assert_eq!(r.risk_level, RiskLevel::High);
        assert_eq!(r.redaction_state, RedactionState::Blocked);
        assert_eq!(r.llm_text, "");
        assert!((r.pii_score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_secret_token_blocks() {
        let r = redact_for_model("key is sk-ABCDEFGHIJKLMNOPQRSTUVWX ok");
        assert_eq!(r.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_email_masked_same_length() {
        let text = "連絡は taro@example.com まで";
        let r = redact_for_model(text);
        assert_eq!(r.risk_level, RiskLevel::Medium);
        assert_eq!(r.redaction_state, RedactionState::Masked);
        assert_eq!(r.llm_text.chars().count(), text.chars().count());
        assert!(!r.llm_text.contains("example.com"));
        assert!(r.llm_text.contains(&"█".repeat("taro@example.com".len())));
    }

    #[test]
    fn test_postal_and_phone_scores() {
        assert!((pii_score("〒150-0001") - 0.70).abs() < 1e-9);
        assert!((pii_score("call 090-1234-5678") - 0.70).abs() < 1e-9);
        assert!((pii_score("call +81 90 1234 56789") - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_clean_text_passes() {
        let r = redact_for_model("今日は雨だった");
        assert_eq!(r.risk_level, RiskLevel::Low);
        assert_eq!(r.redaction_state, RedactionState::Clear);
        assert_eq!(r.llm_text, "今日は雨だった");
        assert_eq!(r.pii_score, 0.0);
    }

    #[test]
    fn test_risk_thresholds() {
        assert_eq!(risk_for_score(0.90), RiskLevel::High);
        assert_eq!(risk_for_score(0.89), RiskLevel::Medium);
        assert_eq!(risk_for_score(0.50), RiskLevel::Medium);
        assert_eq!(risk_for_score(0.49), RiskLevel::Low);
    }
}
