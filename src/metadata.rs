use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::Category;
use crate::error::FeatureError;

pub const METADATA_KEY: &str = "metadata.json";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FeatureCatalog {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetadataDocument {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub total_cells: Option<usize>,
    pub genes: FeatureCatalog,
    pub tfs: FeatureCatalog,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Catalog of known feature names per category. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct MetadataIndex {
    document: MetadataDocument,
    gene_names: HashSet<String>,
    tf_names: HashSet<String>,
}

impl MetadataIndex {
    pub fn from_document(document: MetadataDocument) -> Self {
        let gene_names = document.genes.features.iter().cloned().collect();
        let tf_names = document.tfs.features.iter().cloned().collect();
        Self {
            document,
            gene_names,
            tf_names,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, FeatureError> {
        let document: MetadataDocument = serde_json::from_slice(bytes).map_err(|err| {
            FeatureError::malformed(0, format!("metadata document: {err}"))
        })?;
        Ok(Self::from_document(document))
    }

    pub fn document(&self) -> &MetadataDocument {
        &self.document
    }

    pub fn catalog(&self, category: Category) -> &FeatureCatalog {
        match category {
            Category::Gene => &self.document.genes,
            Category::TfActivity => &self.document.tfs,
        }
    }

    pub fn features(&self, category: Category) -> &[String] {
        &self.catalog(category).features
    }

    /// Declared total for the category, falling back to the listed names when the
    /// document omits it.
    pub fn total(&self, category: Category) -> usize {
        let catalog = self.catalog(category);
        if catalog.total == 0 {
            catalog.features.len()
        } else {
            catalog.total
        }
    }

    pub fn contains(&self, name: &str, category: Category) -> bool {
        match category {
            Category::Gene => self.gene_names.contains(name),
            Category::TfActivity => self.tf_names.contains(name),
        }
    }

    pub fn validate(&self, name: &str, category: Category) -> Result<(), FeatureError> {
        if self.contains(name, category) {
            return Ok(());
        }
        Err(FeatureError::UnknownFeature {
            category: category.to_string(),
            name: name.to_string(),
        })
    }

    /// Category that lists `name`, genes first; falls back to name-based inference.
    pub fn category_of(&self, name: &str) -> Category {
        Category::ALL
            .into_iter()
            .find(|category| self.contains(name, *category))
            .unwrap_or_else(|| Category::infer(name))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SAMPLE: &str = r#"{
        "version": "1.0",
        "format": "sparse_binary",
        "total_cells": 3,
        "genes": { "total": 2, "features": ["Shh", "Pax9"] },
        "tfs": { "total": 1, "features": ["Foxa1_extended"] },
        "last_updated": "2024-05-01T10:00:00"
    }"#;

    #[test]
    fn parse_metadata_document() {
        let index = MetadataIndex::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(index.total(Category::Gene), 2);
        assert_eq!(index.features(Category::TfActivity), ["Foxa1_extended"]);
        assert_eq!(index.document().total_cells, Some(3));
        assert!(index.contains("Pax9", Category::Gene));
        assert!(!index.contains("Pax9", Category::TfActivity));
    }

    #[test]
    fn validate_unknown_feature() {
        let index = MetadataIndex::parse(SAMPLE.as_bytes()).unwrap();
        let err = index.validate("Nope", Category::Gene).unwrap_err();
        assert_matches!(err, FeatureError::UnknownFeature { .. });
    }

    #[test]
    fn category_lookup_prefers_catalog() {
        let index = MetadataIndex::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(index.category_of("Shh"), Category::Gene);
        assert_eq!(index.category_of("Foxa1_extended"), Category::TfActivity);
        assert_eq!(index.category_of("Sox2_direct"), Category::TfActivity);
    }

    #[test]
    fn missing_category_is_malformed() {
        let err = MetadataIndex::parse(br#"{"genes": {"total": 0, "features": []}}"#).unwrap_err();
        assert_matches!(err, FeatureError::MalformedInput { .. });
    }
}
