//! Masking of credential-shaped substrings before text reaches a log sink.

use lazy_static::lazy_static;
use regex::Regex;

const MASK: &str = "[REDACTED]";

lazy_static! {
    static ref SECRET_PATTERNS: Vec<(Regex, &'static str)> = vec![
        // GitHub OAuth, user-to-server, PAT and refresh tokens.
        (
            Regex::new(r"\b(?:gh[opsur]_[A-Za-z0-9]{16,}|github_pat_[A-Za-z0-9_]{20,})").unwrap(),
            MASK,
        ),
        // Copilot API tokens: `tid=...;exp=...;...:<hmac>`.
        (Regex::new(r"\btid=[^\s\x22',]+").unwrap(), MASK),
        (
            Regex::new(r"(?i)\b(bearer|authorization:\s*token)\s+[A-Za-z0-9._~+/=:;-]{8,}").unwrap(),
            "$1 [REDACTED]",
        ),
        (
            Regex::new(r#"(?i)("?(?:device_code|access_token|github_token)"?\s*[:=]\s*"?)[^\s",&}]+"#)
                .unwrap(),
            "${1}[REDACTED]",
        ),
    ];
}

/// Replace every recognizable secret in `text` with a fixed mask.
pub fn redact_secrets(text: &str) -> String {
    let mut output = text.to_string();
    for (pattern, replacement) in SECRET_PATTERNS.iter() {
        if pattern.is_match(&output) {
            output = pattern.replace_all(&output, *replacement).into_owned();
        }
    }
    output
}

/// Short, non-reversible preview of a secret for diagnostics.
pub fn mask_secret(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 8 {
        return "****".to_string();
    }
    format!("{visible}****")
}
