use std::collections::HashMap;

use lazy_static::lazy_static;
use thiserror::Error;

/// Weight charged for models missing from the table.
pub const UNKNOWN_MODEL_MULTIPLIER: f64 = 1.0;

/// Premium-request weights per model, relative to one standard request.
const BUILTIN_MULTIPLIERS: &[(&str, f64)] = &[
    ("gpt-4.1", 0.0),
    ("gpt-4o", 0.0),
    ("gpt-5-mini", 0.0),
    ("raptor-mini", 0.0),
    ("grok-code-fast-1", 0.0),
    ("gpt-5", 1.0),
    ("gpt-5-codex", 1.0),
    ("gpt-5.1", 1.0),
    ("gpt-5.1-codex", 1.0),
    ("gpt-5.1-codex-mini", 0.33),
    ("o3", 1.0),
    ("o4-mini", 0.33),
    ("claude-haiku-4.5", 0.33),
    ("claude-sonnet-4", 1.0),
    ("claude-sonnet-4.5", 1.0),
    ("claude-3.7-sonnet", 1.0),
    ("claude-3.7-sonnet-thought", 1.25),
    ("claude-opus-4.1", 10.0),
    ("claude-opus-4.5", 3.0),
    ("gemini-2.0-flash-001", 0.25),
    ("gemini-2.5-pro", 1.0),
    ("gemini-3-pro-preview", 1.0),
];

lazy_static! {
    static ref BUILTIN_TABLE: MultiplierTable =
        MultiplierTable::new(BUILTIN_MULTIPLIERS.iter().copied())
            .expect("built-in multipliers are finite and non-negative");
}

#[derive(Debug, Error, PartialEq)]
pub enum MultiplierError {
    #[error("multiplier for '{model}' must be a finite, non-negative number (got {value})")]
    Invalid { model: String, value: f64 },
}

/// Normalize a model identifier: drop any `provider/` prefix, trim and
/// lowercase.
pub fn normalize_model_id(model: &str) -> String {
    let trimmed = model.trim();
    let bare = trimmed.rsplit('/').next().unwrap_or(trimmed);
    bare.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone)]
pub struct MultiplierTable {
    weights: HashMap<String, f64>,
}

impl MultiplierTable {
    /// Build a table, rejecting negative or non-finite weights.
    pub fn new<I, S>(entries: I) -> Result<Self, MultiplierError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut weights = HashMap::new();
        for (model, value) in entries {
            let model = model.as_ref();
            if !value.is_finite() || value < 0.0 {
                return Err(MultiplierError::Invalid {
                    model: model.to_string(),
                    value,
                });
            }
            weights.insert(normalize_model_id(model), value);
        }
        Ok(Self { weights })
    }

    /// Shared table of Copilot's published multipliers.
    pub fn shared() -> &'static MultiplierTable {
        &BUILTIN_TABLE
    }

    pub fn multiplier(&self, model: &str) -> f64 {
        self.weights
            .get(&normalize_model_id(model))
            .copied()
            .unwrap_or(UNKNOWN_MODEL_MULTIPLIER)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl Default for MultiplierTable {
    fn default() -> Self {
        Self::shared().clone()
    }
}
