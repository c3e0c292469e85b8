use serde::{Deserialize, Serialize};

use crate::constants::{BOLD_MOVE_BADGE, TRENDSETTER_BADGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

/// What a badge requires. Adding a kind means extending this enum and the evaluator's match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    TotalVotes { threshold: u32 },
    Streak { threshold: u32 },
    FriendsCount { threshold: u32 },
    MajorityVotes { threshold: u32 },
    MinorityVotes { threshold: u32 },
    SessionVotes { threshold: u32 },
    /// Local hour in `[start, end)`; wraps past midnight when `start > end`
    TimeRange { start: u32, end: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub rarity: Rarity,
    pub condition: Condition,
}

impl BadgeDefinition {
    pub fn new(
        id: &str,
        name: &str,
        description: &str,
        icon: &str,
        rarity: Rarity,
        condition: Condition,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            rarity,
            condition,
        }
    }
}

impl Condition {
    pub fn hour_in_range(start: u32, end: u32, hour: u32) -> bool {
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

/// Ordered badge catalog; evaluation and notification follow this order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeCatalog {
    badges: Vec<BadgeDefinition>,
}

impl BadgeCatalog {
    pub fn new(badges: Vec<BadgeDefinition>) -> Self {
        Self { badges }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BadgeDefinition> {
        self.badges.iter()
    }

    pub fn get(&self, id: &str) -> Option<&BadgeDefinition> {
        self.badges.iter().find(|badge| badge.id == id)
    }

    pub fn len(&self) -> usize {
        self.badges.len()
    }

    pub fn standard() -> Self {
        use Condition::*;
        use Rarity::*;

        Self::new(vec![
            BadgeDefinition::new(
                "first_vote",
                "First Vote",
                "Cast your very first vote",
                "🗳️",
                Common,
                TotalVotes { threshold: 1 },
            ),
            BadgeDefinition::new(
                "decisive",
                "Decisive",
                "Vote on 10 dilemmas",
                "⚖️",
                Common,
                TotalVotes { threshold: 10 },
            ),
            BadgeDefinition::new(
                "opinionated",
                "Opinionated",
                "Vote on 100 dilemmas",
                "📣",
                Rare,
                TotalVotes { threshold: 100 },
            ),
            BadgeDefinition::new(
                "philosopher",
                "Philosopher",
                "Vote on 500 dilemmas",
                "🦉",
                Epic,
                TotalVotes { threshold: 500 },
            ),
            BadgeDefinition::new(
                "on_fire",
                "On Fire",
                "Keep a 3 day streak",
                "🔥",
                Common,
                Streak { threshold: 3 },
            ),
            BadgeDefinition::new(
                "committed",
                "Committed",
                "Keep a 7 day streak",
                "📅",
                Rare,
                Streak { threshold: 7 },
            ),
            BadgeDefinition::new(
                "unstoppable",
                "Unstoppable",
                "Keep a 30 day streak",
                "⚡",
                Legendary,
                Streak { threshold: 30 },
            ),
            BadgeDefinition::new(
                "social_butterfly",
                "Social Butterfly",
                "Make 5 friends",
                "🦋",
                Rare,
                FriendsCount { threshold: 5 },
            ),
            BadgeDefinition::new(
                TRENDSETTER_BADGE,
                "Trendsetter",
                "Side with the majority 25 times",
                "📈",
                Rare,
                MajorityVotes { threshold: 25 },
            ),
            BadgeDefinition::new(
                BOLD_MOVE_BADGE,
                "Bold Move",
                "Side with the minority 25 times",
                "🎲",
                Epic,
                MinorityVotes { threshold: 25 },
            ),
            BadgeDefinition::new(
                "marathon",
                "Marathon",
                "Vote 20 times in one session",
                "🏃",
                Rare,
                SessionVotes { threshold: 20 },
            ),
            BadgeDefinition::new(
                "night_owl",
                "Night Owl",
                "Vote between midnight and 4am",
                "🌙",
                Common,
                TimeRange { start: 0, end: 4 },
            ),
            BadgeDefinition::new(
                "early_bird",
                "Early Bird",
                "Vote between 5am and 7am",
                "🐦",
                Common,
                TimeRange { start: 5, end: 7 },
            ),
        ])
    }
}

impl Default for BadgeCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_condition_wire_format() {
        let parsed: Condition =
            serde_json::from_value(json!({ "type": "majority_votes", "threshold": 5 })).unwrap();
        assert_eq!(parsed, Condition::MajorityVotes { threshold: 5 });

        let parsed: Condition =
            serde_json::from_value(json!({ "type": "time_range", "start": 22, "end": 2 })).unwrap();
        assert_eq!(parsed, Condition::TimeRange { start: 22, end: 2 });

        assert!(serde_json::from_value::<Condition>(json!({ "type": "karma" })).is_err());
    }

    #[test]
    fn test_hour_range_end_exclusive() {
        assert!(Condition::hour_in_range(0, 4, 0));
        assert!(Condition::hour_in_range(0, 4, 3));
        assert!(!Condition::hour_in_range(0, 4, 4));

        // wrapping ranges
        assert!(Condition::hour_in_range(22, 2, 23));
        assert!(Condition::hour_in_range(22, 2, 1));
        assert!(!Condition::hour_in_range(22, 2, 2));
        assert!(!Condition::hour_in_range(22, 2, 12));
    }

    #[test]
    fn test_standard_catalog_ids_unique() {
        let catalog = BadgeCatalog::standard();
        let ids: HashSet<_> = catalog.iter().map(|b| b.id.as_str()).collect();

        assert_eq!(ids.len(), catalog.len());
        assert!(catalog.get(TRENDSETTER_BADGE).is_some());
        assert!(catalog.get(BOLD_MOVE_BADGE).is_some());
    }
}
