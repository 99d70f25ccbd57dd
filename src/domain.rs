use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FeatureError;

static ACTIVITY_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[_.\-](?:direct|extended)|\([+-]\)").expect("static regex")
});

static ACTIVITY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:[_.\-](direct|extended)|\(([+-])\))$").expect("static regex")
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
pub enum Category {
    #[serde(rename = "genes")]
    #[value(name = "genes", alias = "gene")]
    Gene,
    #[serde(rename = "tfs")]
    #[value(name = "tfs", alias = "tf")]
    TfActivity,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Gene, Category::TfActivity];

    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Gene => "genes",
            Category::TfActivity => "tfs",
        }
    }

    /// Names containing an activity marker anywhere are TF activities, everything else is a
    /// gene.
    pub fn infer(name: &str) -> Category {
        if ACTIVITY_MARKER.is_match(name) {
            Category::TfActivity
        } else {
            Category::Gene
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Category {
    type Err = FeatureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "genes" | "gene" => Ok(Category::Gene),
            "tfs" | "tf" | "tf_activity" => Ok(Category::TfActivity),
            _ => Err(FeatureError::InvalidCategory(value.to_string())),
        }
    }
}

/// Human label for a feature name, e.g. `Foxa1_extended` -> `Foxa1 (extended)`.
pub fn display_label(name: &str) -> String {
    let trimmed = name.trim();
    let Some(caps) = ACTIVITY_SUFFIX.captures(trimmed) else {
        return trimmed.to_string();
    };
    let Some(whole) = caps.get(0) else {
        return trimmed.to_string();
    };
    let base = &trimmed[..whole.start()];
    match (caps.get(1), caps.get(2)) {
        (Some(word), _) => format!("{base} ({})", word.as_str().to_ascii_lowercase()),
        (None, Some(sign)) => format!("{base} ({})", sign.as_str()),
        (None, None) => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureKey {
    pub category: Category,
    pub name: String,
}

impl FeatureKey {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }

    /// Resource key of the feature's sparse record, relative to the dataset root.
    pub fn resource_key(&self) -> String {
        format!("{}/{}.bin", self.category.dir_name(), self.name)
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub slice: String,
    pub region: String,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn infer_activity_suffixes() {
        assert_eq!(Category::infer("Foxa1_extended"), Category::TfActivity);
        assert_eq!(Category::infer("Sox9_DIRECT"), Category::TfActivity);
        assert_eq!(Category::infer("Pax3(+)"), Category::TfActivity);
        assert_eq!(Category::infer("Shh"), Category::Gene);
        assert_eq!(Category::infer("directed_gene"), Category::Gene);
        assert_eq!(Category::infer("Pax9-like"), Category::Gene);
        assert_eq!(Category::infer(""), Category::Gene);
    }

    #[test]
    fn infer_matches_markers_mid_name() {
        assert_eq!(Category::infer("Foxa1_extended_motif"), Category::TfActivity);
        assert_eq!(Category::infer("Sox9_direct.v2"), Category::TfActivity);
        assert_eq!(Category::infer("Pax3(-)_rep1"), Category::TfActivity);
        assert_eq!(display_label("Foxa1_extended_motif"), "Foxa1_extended_motif");
    }

    #[test]
    fn parse_category() {
        assert_eq!("genes".parse::<Category>().unwrap(), Category::Gene);
        assert_eq!("TF".parse::<Category>().unwrap(), Category::TfActivity);
        let err = "cells".parse::<Category>().unwrap_err();
        assert_matches!(err, FeatureError::InvalidCategory(_));
    }

    #[test]
    fn resource_key_layout() {
        let key = FeatureKey::new("Shh", Category::Gene);
        assert_eq!(key.resource_key(), "genes/Shh.bin");
        let key = FeatureKey::new("Foxa1_direct", Category::TfActivity);
        assert_eq!(key.resource_key(), "tfs/Foxa1_direct.bin");
    }
}
