//! Fixed, ordered vocabularies for categorical attributes

use serde::{Deserialize, Serialize};

/// Encoding used for values outside the vocabulary (or missing)
pub const UNKNOWN_ENCODING: f32 = 0.5;

/// Ordered list of accepted values for one categorical attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocabulary {
    entries: Vec<String>,
}

impl Vocabulary {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| canonical(&e.into()))
                .collect(),
        }
    }

    /// Default vocabulary for the `category` attribute.
    ///
    /// The image classifier predicts over the same list.
    pub fn default_categories() -> Self {
        Self::new([
            "furniture",
            "jewelry",
            "art",
            "collectibles",
            "electronics",
            "ceramics",
            "textiles",
            "other",
        ])
    }

    pub fn default_conditions() -> Self {
        Self::new(["poor", "fair", "good", "very_good", "excellent", "mint"])
    }

    pub fn default_rarities() -> Self {
        Self::new(["common", "uncommon", "rare", "very_rare", "unique"])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    /// Position of `value`, matched after trimming and lowercasing
    pub fn index_of(&self, value: &str) -> Option<usize> {
        let needle = canonical(value);
        self.entries.iter().position(|e| *e == needle)
    }

    /// Encode a value as `index / (len - 1)`; unknown or missing is 0.5
    pub fn encode(&self, value: Option<&str>) -> f32 {
        let Some(index) = value.and_then(|v| self.index_of(v)) else {
            return UNKNOWN_ENCODING;
        };
        if self.entries.len() < 2 {
            return UNKNOWN_ENCODING;
        }
        index as f32 / (self.entries.len() - 1) as f32
    }
}

fn canonical(value: &str) -> String {
    value.trim().to_lowercase()
}
