//! Quest and reward-tier catalog loading.
//!
//! Catalogs are operator-edited YAML files, so the loader is lenient:
//! disabled quests are skipped, steps with a blank type are dropped,
//! `required` is clamped to a minimum of 1, and a quest left with no
//! steps is skipped with a warning. Only unreadable files and broken
//! YAML are hard errors.

use std::collections::BTreeMap;
use std::path::Path;

use questline_types::{QuestCadence, QuestDef, QuestStep, RewardTier};
use serde::Deserialize;

use crate::tiers::RewardsTable;

/// Errors that can occur when loading a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Failed to read the catalog file from disk.
    #[error("failed to read catalog file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse catalog YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for CatalogError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Raw quest entry as written in the YAML file (id is the map key).
#[derive(Debug, Deserialize)]
struct RawQuest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    points: u64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    premium_only: bool,
    #[serde(default)]
    premium_bonus_points: u64,
    #[serde(default = "default_cadence")]
    cadence: QuestCadence,
    #[serde(default)]
    available_weeks: Vec<u32>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

/// Raw step entry as written in the YAML file.
#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default = "default_required")]
    required: u64,
}

const fn default_enabled() -> bool {
    true
}

const fn default_cadence() -> QuestCadence {
    QuestCadence::Season
}

const fn default_required() -> u64 {
    1
}

/// The quest catalog file root.
#[derive(Debug, Deserialize)]
struct QuestFile {
    /// Quests keyed by id. A `BTreeMap` keeps catalog order stable.
    #[serde(default)]
    quests: BTreeMap<String, RawQuest>,
}

/// The loaded, validated quest catalog.
#[derive(Debug, Default)]
pub struct QuestCatalog {
    quests: Vec<QuestDef>,
}

impl QuestCatalog {
    /// Load and validate a quest catalog from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] on I/O or YAML failure. Invalid entries
    /// inside a parseable file are skipped with a warning, not errors.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate a quest catalog from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, CatalogError> {
        let file: QuestFile = serde_yml::from_str(yaml)?;

        let mut quests = Vec::with_capacity(file.quests.len());
        for (id, raw) in file.quests {
            if !raw.enabled {
                continue;
            }
            if id.trim().is_empty() {
                tracing::warn!("Skipping quest with blank id");
                continue;
            }

            let mut steps = Vec::with_capacity(raw.steps.len());
            for raw_step in raw.steps {
                if raw_step.event_type.trim().is_empty() {
                    tracing::warn!(quest_id = id.as_str(), "Dropping step with blank type");
                    continue;
                }
                steps.push(QuestStep {
                    event_type: raw_step.event_type.trim().to_owned(),
                    key: raw_step.key.trim().to_owned(),
                    value: raw_step.value.trim().to_owned(),
                    required: raw_step.required.max(1),
                });
            }

            if steps.is_empty() {
                tracing::warn!(quest_id = id.as_str(), "Skipping quest with no usable steps");
                continue;
            }

            let mut available_weeks = raw.available_weeks;
            available_weeks.sort_unstable();
            available_weeks.dedup();

            quests.push(QuestDef {
                name: raw.name.unwrap_or_else(|| id.clone()),
                id,
                points: raw.points,
                premium_only: raw.premium_only,
                premium_bonus_points: raw.premium_bonus_points,
                cadence: raw.cadence,
                available_weeks,
                steps,
            });
        }

        tracing::info!(quest_count = quests.len(), "Quest catalog loaded");
        Ok(Self { quests })
    }

    /// The validated quest definitions, in catalog order.
    pub fn quests(&self) -> &[QuestDef] {
        &self.quests
    }

    /// Consume the catalog into its quest list.
    pub fn into_quests(self) -> Vec<QuestDef> {
        self.quests
    }
}

/// The reward catalog file root.
#[derive(Debug, Deserialize)]
struct RewardFile {
    #[serde(default)]
    tiers: Vec<RewardTier>,
}

/// The loaded reward-tier catalog.
#[derive(Debug, Default)]
pub struct RewardCatalog {
    tiers: Vec<RewardTier>,
}

impl RewardCatalog {
    /// Load a reward catalog from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] on I/O or YAML failure.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse a reward catalog from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, CatalogError> {
        let file: RewardFile = serde_yml::from_str(yaml)?;
        tracing::info!(tier_count = file.tiers.len(), "Reward catalog loaded");
        Ok(Self { tiers: file.tiers })
    }

    /// Build the season's tier table (sorted, monotonic failsafe applied).
    pub fn into_table(self) -> RewardsTable {
        RewardsTable::new(self.tiers)
    }

    /// The raw tier rows as configured.
    pub fn tiers(&self) -> &[RewardTier] {
        &self.tiers
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const QUESTS_YAML: &str = r"
quests:
  mine_gold:
    name: Gold Rush
    points: 100
    cadence: weekly
    available_weeks: [2, 2, 3]
    steps:
      - type: block_break
        key: block
        value: gold_ore
        required: 10
  daily_fish:
    points: 25
    cadence: daily
    steps:
      - type: fish_catch
  disabled_one:
    enabled: false
    points: 5
    steps:
      - type: mob_kill
  broken_no_steps:
    points: 5
    steps: []
";

    #[test]
    fn catalog_parses_and_validates() {
        let catalog = QuestCatalog::parse(QUESTS_YAML).unwrap();
        let quests = catalog.quests();
        assert_eq!(quests.len(), 2);

        let gold = quests.iter().find(|q| q.id == "mine_gold").unwrap();
        assert_eq!(gold.name, "Gold Rush");
        assert_eq!(gold.cadence, QuestCadence::Weekly);
        assert_eq!(gold.available_weeks, vec![2, 3]);

        let fish = quests.iter().find(|q| q.id == "daily_fish").unwrap();
        // Name defaults to the id; required defaults to 1.
        assert_eq!(fish.name, "daily_fish");
        assert_eq!(fish.steps.first().map(|s| s.required), Some(1));
    }

    #[test]
    fn blank_step_types_are_dropped() {
        let yaml = r"
quests:
  q:
    points: 1
    steps:
      - type: ''
      - type: block_break
";
        let catalog = QuestCatalog::parse(yaml).unwrap();
        let quest = catalog.quests().first().unwrap();
        assert_eq!(quest.steps.len(), 1);
    }

    #[test]
    fn zero_required_is_clamped() {
        let yaml = r"
quests:
  q:
    points: 1
    steps:
      - type: block_break
        required: 0
";
        let catalog = QuestCatalog::parse(yaml).unwrap();
        let step = catalog.quests().first().unwrap().steps.first().unwrap();
        assert_eq!(step.required, 1);
    }

    #[test]
    fn empty_file_is_an_empty_catalog() {
        let catalog = QuestCatalog::parse("{}").unwrap();
        assert!(catalog.quests().is_empty());
    }

    #[test]
    fn garbage_yaml_is_an_error() {
        assert!(QuestCatalog::parse("quests: [not, a, map]").is_err());
    }

    #[test]
    fn reward_catalog_builds_table() {
        let yaml = r"
tiers:
  - tier: 1
    points_required: 100
  - tier: 2
    points_required: 250
";
        let table = RewardCatalog::parse(yaml).unwrap().into_table();
        assert_eq!(table.max_tier(), 2);
        assert_eq!(table.tier_for_points(249), 1);
    }
}
