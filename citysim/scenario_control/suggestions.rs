use serde::Serialize;

use crate::catalog::{ScenarioDefinition, SCENARIOS};

/// Temperature at or above which the catastrophic heat scenario is suggested.
pub const CATASTROPHIC_HEAT_F: i32 = 110;
/// Temperature at or above which the heatwave scenario is suggested.
pub const HEATWAVE_F: i32 = 95;

/// Ranked scenario suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    /// Catalog key.
    pub scenario_key: &'static str,
    /// Why it was suggested.
    pub reason: String,
    /// 1 is highest.
    pub priority: u8,
}

/// Ranks every catalog scenario for a given hour and temperature.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestionEngine;

impl SuggestionEngine {
    /// Creates the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Full catalog ordered by priority; ties keep catalog order.
    #[must_use]
    pub fn suggestions_for(&self, hour: u8, temperature_f: i32) -> Vec<Suggestion> {
        let mut picked: Vec<Suggestion> = Vec::with_capacity(SCENARIOS.len());

        let (primary, why) = primary_for(hour);
        picked.push(Suggestion {
            scenario_key: primary,
            reason: why,
            priority: 1,
        });

        if let Some((key, why)) = weather_for(temperature_f) {
            if !picked.iter().any(|s| s.scenario_key == key) {
                picked.push(Suggestion {
                    scenario_key: key,
                    reason: why,
                    priority: 2,
                });
            }
        }

        for scenario in &SCENARIOS {
            if picked.iter().any(|s| s.scenario_key == scenario.key) {
                continue;
            }
            picked.push(Suggestion {
                scenario_key: scenario.key,
                reason: describe(scenario),
                priority: 3,
            });
        }

        // Stable, so catalog order survives within a tier.
        picked.sort_by_key(|s| s.priority);
        picked
    }
}

fn primary_for(hour: u8) -> (&'static str, String) {
    match hour {
        7..=9 => (
            "morning_rush",
            format!("It is {hour:02}:00, inside the morning commute window"),
        ),
        16..=19 => (
            "evening_rush",
            format!("It is {hour:02}:00, inside the evening commute window"),
        ),
        22..=23 | 0..=4 => (
            "late_night",
            format!("It is {hour:02}:00, traffic should be near its daily low"),
        ),
        _ => (
            "midday_normal",
            format!("It is {hour:02}:00, a good time for a baseline run"),
        ),
    }
}

fn weather_for(temperature_f: i32) -> Option<(&'static str, String)> {
    if temperature_f >= CATASTROPHIC_HEAT_F {
        Some((
            "catastrophic_heat",
            format!("{temperature_f}°F is past the catastrophic heat threshold"),
        ))
    } else if temperature_f >= HEATWAVE_F {
        Some((
            "heatwave",
            format!("{temperature_f}°F qualifies as a heatwave"),
        ))
    } else {
        None
    }
}

fn describe(scenario: &ScenarioDefinition) -> String {
    format!(
        "{} ({} difficulty, {} vehicles at {:02}:00)",
        scenario.description,
        scenario.difficulty.label(),
        scenario.vehicle_target,
        scenario.hour
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn engine() -> SuggestionEngine {
        SuggestionEngine::new()
    }

    #[test]
    fn always_returns_whole_catalog_sorted() {
        for hour in 0..24u8 {
            for temp in [10, 60, 94, 95, 109, 110, 120] {
                let list = engine().suggestions_for(hour, temp);
                assert_eq!(list.len(), SCENARIOS.len());
                let unique: HashSet<_> = list.iter().map(|s| s.scenario_key).collect();
                assert_eq!(unique.len(), SCENARIOS.len());
                assert!(list.windows(2).all(|w| w[0].priority <= w[1].priority));
                assert_eq!(list.iter().filter(|s| s.priority == 1).count(), 1);
            }
        }
    }

    #[test]
    fn primary_follows_hour() {
        assert_eq!(engine().suggestions_for(8, 70)[0].scenario_key, "morning_rush");
        assert_eq!(engine().suggestions_for(18, 70)[0].scenario_key, "evening_rush");
        assert_eq!(engine().suggestions_for(23, 70)[0].scenario_key, "late_night");
        assert_eq!(engine().suggestions_for(3, 70)[0].scenario_key, "late_night");
        assert_eq!(engine().suggestions_for(13, 70)[0].scenario_key, "midday_normal");
    }

    #[test]
    fn heat_thresholds_are_exclusive() {
        let hot = engine().suggestions_for(13, 112);
        assert_eq!(hot[1].scenario_key, "catastrophic_heat");
        assert_eq!(hot[1].priority, 2);
        assert_eq!(hot.iter().filter(|s| s.priority == 2).count(), 1);

        let warm = engine().suggestions_for(13, 95);
        assert_eq!(warm[1].scenario_key, "heatwave");

        let mild = engine().suggestions_for(13, 94);
        assert!(mild.iter().all(|s| s.priority != 2));
    }

    #[test]
    fn filler_keeps_catalog_order() {
        let list = engine().suggestions_for(13, 70);
        let filler: Vec<_> = list
            .iter()
            .filter(|s| s.priority == 3)
            .map(|s| s.scenario_key)
            .collect();
        let expected: Vec<_> = SCENARIOS
            .iter()
            .map(|s| s.key)
            .filter(|k| *k != "midday_normal")
            .collect();
        assert_eq!(filler, expected);
        assert!(crate::catalog::scenario_for(list[0].scenario_key).is_some());
    }
}
