//! Craft advice for a predicted label

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Returned for empty or unknown labels
pub const DEFAULT_SUGGESTION: &str = "Sorry, no suggestion available for this craft type.";

/// Built-in advice, keyed by model label
static SUGGESTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            "craft_type_1",
            "Try using a blue thread to create a beautiful embroidery pattern.",
        ),
        (
            "craft_type_2",
            "You can use a hot glue gun to attach the fabric pieces together.",
        ),
    ])
});

/// Look up the built-in suggestion for `label`. Never fails and never
/// returns an empty string.
pub fn resolve_suggestion(label: &str) -> &'static str {
    SUGGESTIONS.get(label).copied().unwrap_or(DEFAULT_SUGGESTION)
}

/// The built-in table extended with (or overridden by) configured entries
#[derive(Debug, Clone, Default)]
pub struct SuggestionResolver {
    overrides: HashMap<String, String>,
}

impl SuggestionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries with empty text are ignored
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        let overrides = overrides
            .into_iter()
            .filter(|(label, text)| !label.is_empty() && !text.trim().is_empty())
            .collect();
        SuggestionResolver { overrides }
    }

    pub fn resolve(&self, label: &str) -> &str {
        match self.overrides.get(label) {
            Some(text) => text,
            None => resolve_suggestion(label),
        }
    }
}
