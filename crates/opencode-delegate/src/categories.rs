//! Delegation categories: named buckets mapping task intent to a
//! default model and prompt suffix.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A resolved category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    /// What this category is for.
    pub description: String,
    /// Default model as `provider/model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Suffix appended to delegated prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_append: Option<String>,
}

/// A user override for one category; unset fields keep the built-in
/// value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryOverride {
    /// Replacement description.
    pub description: Option<String>,
    /// Replacement model.
    pub model: Option<String>,
    /// Replacement prompt suffix.
    pub prompt_append: Option<String>,
}

/// The category table: built-in defaults plus per-key user overrides.
#[derive(Debug, Clone, Default)]
pub struct Categories {
    overrides: HashMap<String, CategoryOverride>,
}

impl Categories {
    /// Create a table with user overrides.
    #[must_use]
    pub fn new(overrides: HashMap<String, CategoryOverride>) -> Self {
        Self { overrides }
    }

    /// The built-in category set.
    #[must_use]
    pub fn builtin() -> BTreeMap<String, Category> {
        let entry = |description: &str, prompt_append: Option<&str>| Category {
            description: description.to_owned(),
            model: None,
            prompt_append: prompt_append.map(ToOwned::to_owned),
        };

        BTreeMap::from([
            (
                "visual-engineering".to_owned(),
                entry(
                    "UI, layout, and visual polish work",
                    Some("Favor small, reviewable visual changes and describe what changed on screen."),
                ),
            ),
            (
                "ultrabrain".to_owned(),
                entry(
                    "The hardest problems: deep reasoning over speed",
                    Some("Take as many reasoning steps as the problem needs before answering."),
                ),
            ),
            (
                "deep".to_owned(),
                entry("Thorough multi-step analysis and refactors", None),
            ),
            (
                "artistry".to_owned(),
                entry("Creative and generative work", None),
            ),
            (
                "quick".to_owned(),
                entry(
                    "Small, fast tasks where latency matters",
                    Some("Favor the fastest correct answer. Skip exposition."),
                ),
            ),
            (
                "writing".to_owned(),
                entry("Prose, documentation, and communication", None),
            ),
            (
                "unspecified-low".to_owned(),
                entry("Fallback bucket for uncategorized low-effort tasks", None),
            ),
            (
                "unspecified-high".to_owned(),
                entry("Fallback bucket for uncategorized high-effort tasks", None),
            ),
        ])
    }

    /// The effective table: built-ins with user overrides merged
    /// per key. Overrides for unknown names define new categories.
    #[must_use]
    pub fn resolve(&self) -> BTreeMap<String, Category> {
        let mut resolved = Self::builtin();

        for (name, patch) in &self.overrides {
            match resolved.get_mut(name) {
                Some(category) => {
                    if let Some(description) = &patch.description {
                        category.description = description.clone();
                    }
                    if let Some(model) = &patch.model {
                        category.model = Some(model.clone());
                    }
                    if let Some(prompt_append) = &patch.prompt_append {
                        category.prompt_append = Some(prompt_append.clone());
                    }
                },
                None => {
                    resolved.insert(
                        name.clone(),
                        Category {
                            description: patch
                                .description
                                .clone()
                                .unwrap_or_else(|| name.clone()),
                            model: patch.model.clone(),
                            prompt_append: patch.prompt_append.clone(),
                        },
                    );
                },
            }
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_set() {
        let builtin = Categories::builtin();
        for name in [
            "visual-engineering",
            "ultrabrain",
            "deep",
            "artistry",
            "quick",
            "writing",
            "unspecified-low",
            "unspecified-high",
        ] {
            assert!(builtin.contains_key(name), "missing builtin '{name}'");
        }
    }

    #[test]
    fn test_override_merges_per_key() {
        let categories = Categories::new(HashMap::from([(
            "quick".to_owned(),
            CategoryOverride {
                model: Some("anthropic/claude-haiku".to_owned()),
                ..Default::default()
            },
        )]));

        let resolved = categories.resolve();
        let quick = &resolved["quick"];
        assert_eq!(quick.model.as_deref(), Some("anthropic/claude-haiku"));
        // The built-in description survives a partial override.
        assert!(quick.description.contains("fast"));
    }

    #[test]
    fn test_override_can_define_new_category() {
        let categories = Categories::new(HashMap::from([(
            "review".to_owned(),
            CategoryOverride {
                description: Some("Code review passes".to_owned()),
                model: Some("openai/gpt-5".to_owned()),
                ..Default::default()
            },
        )]));

        let resolved = categories.resolve();
        assert_eq!(resolved["review"].model.as_deref(), Some("openai/gpt-5"));
    }
}
