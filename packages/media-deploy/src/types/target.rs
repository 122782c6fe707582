//! Discovery targets (outlets) and their catalog attributes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority tier of a target. Lower tiers are scheduled first by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityTier {
    #[serde(rename = "tier_1")]
    Tier1,
    #[serde(rename = "tier_2")]
    Tier2,
    #[serde(rename = "tier_3")]
    Tier3,
}

impl PriorityTier {
    pub const ALL: [PriorityTier; 3] = [PriorityTier::Tier1, PriorityTier::Tier2, PriorityTier::Tier3];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::Tier1 => "tier_1",
            PriorityTier::Tier2 => "tier_2",
            PriorityTier::Tier3 => "tier_3",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How hard a target's staff directory is to scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapingDifficulty {
    Easy,
    Medium,
    Hard,
}

impl ScrapingDifficulty {
    pub const ALL: [ScrapingDifficulty; 3] = [
        ScrapingDifficulty::Easy,
        ScrapingDifficulty::Medium,
        ScrapingDifficulty::Hard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapingDifficulty::Easy => "easy",
            ScrapingDifficulty::Medium => "medium",
            ScrapingDifficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for ScrapingDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An external source whose staff directory is scraped for contacts.
///
/// Reference data from the catalog; the orchestrator never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub url: String,
    pub priority_tier: PriorityTier,
    pub scraping_difficulty: ScrapingDifficulty,
    #[serde(default)]
    pub estimated_yield: u32,
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        priority_tier: PriorityTier,
        scraping_difficulty: ScrapingDifficulty,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            priority_tier,
            scraping_difficulty,
            estimated_yield: 0,
        }
    }

    pub fn with_estimated_yield(mut self, estimated_yield: u32) -> Self {
        self.estimated_yield = estimated_yield;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_use_catalog_spelling() {
        let json = serde_json::to_string(&PriorityTier::Tier2).unwrap();
        assert_eq!(json, "\"tier_2\"");

        let tier: PriorityTier = serde_json::from_str("\"tier_3\"").unwrap();
        assert_eq!(tier, PriorityTier::Tier3);
    }

    #[test]
    fn target_deserializes_without_yield() {
        let target: Target = serde_json::from_str(
            r#"{
                "name": "Star Tribune",
                "url": "https://www.startribune.com/staff",
                "priority_tier": "tier_1",
                "scraping_difficulty": "medium"
            }"#,
        )
        .unwrap();

        assert_eq!(target.priority_tier, PriorityTier::Tier1);
        assert_eq!(target.scraping_difficulty, ScrapingDifficulty::Medium);
        assert_eq!(target.estimated_yield, 0);
    }
}
