//! Named test scenarios.

use serde::Serialize;

/// How demanding a scenario is for the simulated network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTier {
    /// Light load.
    Easy,
    /// Typical peak load.
    Medium,
    /// Heavy load or hostile weather.
    Hard,
    /// Stress test.
    Extreme,
}

impl DifficultyTier {
    /// Label for logging.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Extreme => "extreme",
        }
    }
}

/// Fixed bundle of clock, weather and population applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScenarioDefinition {
    /// Unique key.
    pub key: &'static str,
    /// Simulated hour the scenario starts at.
    pub hour: u8,
    /// Ambient temperature in Fahrenheit.
    pub temperature_f: i32,
    /// Vehicle population seeded when the scenario starts.
    pub vehicle_target: u32,
    /// Human readable description.
    pub description: &'static str,
    /// Difficulty classification.
    pub difficulty: DifficultyTier,
    /// Dashboard icon.
    pub icon: &'static str,
    /// Lowercase phrasings an operator may use for this scenario.
    #[serde(skip)]
    pub aliases: &'static [&'static str],
}

impl ScenarioDefinition {
    /// Returns true if any alias occurs in `normalized` (already lowercased).
    #[must_use]
    pub fn matches(&self, normalized: &str) -> bool {
        self.aliases.iter().any(|alias| normalized.contains(alias))
    }
}

/// Scenario catalog in declaration order. Alias matching and suggestion
/// filling both walk this order.
pub const SCENARIOS: [ScenarioDefinition; 8] = [
    ScenarioDefinition {
        key: "morning_rush",
        hour: 8,
        temperature_f: 72,
        vehicle_target: 85,
        description: "Commuters flood the arterials before work",
        difficulty: DifficultyTier::Medium,
        icon: "🚗",
        aliases: &["morning rush", "morning commute", "rush hour", "am peak"],
    },
    ScenarioDefinition {
        key: "evening_rush",
        hour: 18,
        temperature_f: 80,
        vehicle_target: 98,
        description: "Peak outbound traffic with heavy charging demand",
        difficulty: DifficultyTier::Hard,
        icon: "🚦",
        aliases: &["evening rush", "evening commute", "afternoon rush", "pm peak"],
    },
    ScenarioDefinition {
        key: "midday_normal",
        hour: 12,
        temperature_f: 78,
        vehicle_target: 55,
        description: "Ordinary daytime traffic",
        difficulty: DifficultyTier::Easy,
        icon: "☀️",
        aliases: &["midday", "normal day", "lunch traffic", "baseline"],
    },
    ScenarioDefinition {
        key: "late_night",
        hour: 2,
        temperature_f: 62,
        vehicle_target: 12,
        description: "Near-empty streets, mostly overnight charging",
        difficulty: DifficultyTier::Easy,
        icon: "🌙",
        aliases: &["late night", "overnight", "empty streets", "night shift"],
    },
    ScenarioDefinition {
        key: "heatwave",
        hour: 15,
        temperature_f: 100,
        vehicle_target: 70,
        description: "Afternoon heat pushing air conditioning and charging load",
        difficulty: DifficultyTier::Hard,
        icon: "🔥",
        aliases: &["heatwave", "heat wave", "hot day", "100 degrees"],
    },
    ScenarioDefinition {
        key: "catastrophic_heat",
        hour: 14,
        temperature_f: 115,
        vehicle_target: 60,
        description: "Extreme heat at the edge of grid capacity",
        difficulty: DifficultyTier::Extreme,
        icon: "🌡️",
        aliases: &["catastrophic heat", "extreme heat", "115 degrees", "grid meltdown"],
    },
    ScenarioDefinition {
        key: "cold_snap",
        hour: 7,
        temperature_f: 25,
        vehicle_target: 65,
        description: "Freezing morning with reduced battery range",
        difficulty: DifficultyTier::Medium,
        icon: "❄️",
        aliases: &["cold snap", "freezing", "winter morning", "cold weather"],
    },
    ScenarioDefinition {
        key: "ev_surge",
        hour: 17,
        temperature_f: 85,
        vehicle_target: 110,
        description: "Evening arrival wave with every charger in use",
        difficulty: DifficultyTier::Extreme,
        icon: "⚡",
        aliases: &["ev surge", "charging surge", "charger rush", "electric surge"],
    },
];

/// Looks up a scenario by key.
#[must_use]
pub fn scenario_for(key: &str) -> Option<&'static ScenarioDefinition> {
    SCENARIOS.iter().find(|scenario| scenario.key == key)
}

/// First scenario, in declaration order, with an alias contained in `normalized`.
#[must_use]
pub fn match_alias(normalized: &str) -> Option<&'static ScenarioDefinition> {
    SCENARIOS.iter().find(|scenario| scenario.matches(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique() {
        let keys: HashSet<_> = SCENARIOS.iter().map(|scenario| scenario.key).collect();
        assert_eq!(keys.len(), SCENARIOS.len());
    }

    #[test]
    fn evening_rush_matches_catalog_values() {
        let scenario = scenario_for("evening_rush").unwrap();
        assert_eq!(scenario.hour, 18);
        assert_eq!(scenario.temperature_f, 80);
        assert_eq!(scenario.vehicle_target, 98);
        assert!(scenario_for("rush").is_none());
    }

    #[test]
    fn aliases_are_lowercase_and_hours_valid() {
        for scenario in &SCENARIOS {
            assert!(scenario.hour < 24);
            for alias in scenario.aliases {
                assert_eq!(*alias, alias.to_lowercase());
            }
        }
    }

    #[test]
    fn shared_substring_resolves_to_first_declared() {
        // "rush hour" is only a morning alias, but "evening rush hour" contains both lists' phrases.
        assert_eq!(match_alias("evening rush hour").unwrap().key, "morning_rush");
        assert_eq!(match_alias("start the evening rush").unwrap().key, "evening_rush");
        assert!(match_alias("make it rain").is_none());
    }
}
