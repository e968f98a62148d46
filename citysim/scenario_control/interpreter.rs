//! Free-text classifier for operator control commands.
//!
//! Classification is an ordered list of pattern rules. The first rule that
//! produces an intent wins; nothing here tries to understand language beyond
//! those patterns.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{catalog, patterns};

/// Lowest temperature an operator may request, Fahrenheit.
pub const MIN_TEMPERATURE_F: i32 = 10;
/// Highest temperature an operator may request, Fahrenheit.
pub const MAX_TEMPERATURE_F: i32 = 120;

/// Guard key held while a time change is in flight.
pub const TIME_CHANGE_KEY: &str = "time_change";
/// Guard key held while a temperature change is in flight.
pub const TEMPERATURE_CHANGE_KEY: &str = "temperature_change";

static TIME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b(?:time|clock)\s*(?:to|=|at)?\s*(-?\d+)(?::[0-5]\d)?\s*(am|pm)?\b",
        r"\b(\d+)(?::[0-5]\d)?\s*(am|pm)\b",
        r"\b(\d+)\s*o'?clock\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("time pattern compiles"))
    .collect()
});

static TIME_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:time|clock)\s*(?:to|=|at)\s+(?:the\s+)?(.+)$")
        .expect("time label pattern compiles")
});

static MERIDIEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(am|pm)\b").expect("meridiem pattern compiles"));

static TEMPERATURE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\btemp(?:erature)?\s*(?:to|=|at|of|:)?\s*(-?\d+)",
        r"\b(?:heat|warm|cool|chill)(?:\s+it)?(?:\s+(?:up|down))?\s+to\s+(-?\d+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("temperature pattern compiles"))
    .collect()
});

const STATUS_KEYWORDS: [&str; 6] = [
    "status",
    "what time is it",
    "current time",
    "how many vehicles",
    "vehicle count",
    "current state",
];

const SUGGESTION_KEYWORDS: [&str; 6] = [
    "suggest",
    "what should i",
    "recommend",
    "what can i",
    "ideas",
    "what next",
];

/// Typed control intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    /// Jump the simulated clock to an hour.
    SetTime {
        /// Target hour, `0..=23`.
        hour: u8,
    },
    /// Change the ambient temperature.
    SetTemperature {
        /// Target temperature, clamped to the supported range.
        fahrenheit: i32,
    },
    /// Apply a catalog scenario.
    StartScenario {
        /// Catalog key.
        key: String,
    },
    /// Report the current state.
    Status,
    /// Rank scenarios for the current context.
    Suggestions,
}

impl Intent {
    /// Guard key held while this intent changes simulation state; `None`
    /// for read-only intents.
    #[must_use]
    pub fn exclusive_key(&self) -> Option<String> {
        match self {
            Self::SetTime { .. } => Some(TIME_CHANGE_KEY.to_owned()),
            Self::SetTemperature { .. } => Some(TEMPERATURE_CHANGE_KEY.to_owned()),
            Self::StartScenario { key } => Some(key.clone()),
            Self::Status | Self::Suggestions => None,
        }
    }

    /// Label for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SetTime { .. } => "set_time",
            Self::SetTemperature { .. } => "set_temperature",
            Self::StartScenario { .. } => "start_scenario",
            Self::Status => "status",
            Self::Suggestions => "suggestions",
        }
    }
}

/// Classifier rules in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierRule {
    /// Explicit clock requests.
    Time,
    /// Clock requests naming a demand bucket, e.g. "set time to lunch hour".
    PatternLabel,
    /// Explicit temperature requests.
    Temperature,
    /// Scenario phrasings from the catalog.
    ScenarioAlias,
    /// Status questions.
    Status,
    /// Requests for suggestions.
    Suggestions,
}

impl ClassifierRule {
    /// Evaluation order.
    pub const ORDER: [Self; 6] = [
        Self::Time,
        Self::PatternLabel,
        Self::Temperature,
        Self::ScenarioAlias,
        Self::Status,
        Self::Suggestions,
    ];

    /// Applies the rule to normalized text.
    #[must_use]
    pub fn classify(self, normalized: &str) -> Option<Intent> {
        match self {
            Self::Time => extract_time(normalized).map(|hour| Intent::SetTime { hour }),
            Self::PatternLabel => TIME_LABEL
                .captures(normalized)
                .and_then(|captures| patterns::bucket_labelled(captures.get(1)?.as_str()))
                .map(|bucket| Intent::SetTime {
                    hour: bucket.start_hour,
                }),
            Self::Temperature => {
                extract_temperature(normalized).map(|fahrenheit| Intent::SetTemperature { fahrenheit })
            }
            Self::ScenarioAlias => catalog::match_alias(normalized).map(|scenario| {
                Intent::StartScenario {
                    key: scenario.key.to_owned(),
                }
            }),
            Self::Status => contains_any(normalized, &STATUS_KEYWORDS).then_some(Intent::Status),
            Self::Suggestions => {
                contains_any(normalized, &SUGGESTION_KEYWORDS).then_some(Intent::Suggestions)
            }
        }
    }
}

/// Stateless command interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandInterpreter;

impl CommandInterpreter {
    /// Creates an interpreter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classifies `text`. `None` means the text is not a control command.
    #[must_use]
    pub fn interpret(&self, text: &str) -> Option<Intent> {
        self.explain(text).map(|(_, intent)| intent)
    }

    /// Like [`Self::interpret`] but also names the rule that matched.
    #[must_use]
    pub fn explain(&self, text: &str) -> Option<(ClassifierRule, Intent)> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return None;
        }
        ClassifierRule::ORDER
            .iter()
            .find_map(|rule| rule.classify(&normalized).map(|intent| (*rule, intent)))
    }
}

/// Lowercases and trims operator input.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Extracts an hour from normalized text, applying am/pm and clamping to `0..=23`.
#[must_use]
pub fn extract_time(normalized: &str) -> Option<u8> {
    let captures = TIME_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(normalized))?;
    let mut hour = parse_saturating(captures.get(1)?.as_str())?;
    let meridiem = captures
        .get(2)
        .map(|m| m.as_str().to_owned())
        .or_else(|| {
            MERIDIEM
                .captures(normalized)
                .map(|c| c[1].to_owned())
        });
    match meridiem.as_deref() {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }
    u8::try_from(hour.clamp(0, 23)).ok()
}

/// Extracts a temperature from normalized text, clamped to the supported range.
#[must_use]
pub fn extract_temperature(normalized: &str) -> Option<i32> {
    let captures = TEMPERATURE_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(normalized))?;
    let value = parse_saturating(captures.get(1)?.as_str())?;
    i32::try_from(value.clamp(
        i64::from(MIN_TEMPERATURE_F),
        i64::from(MAX_TEMPERATURE_F),
    ))
    .ok()
}

/// Parses a signed integer, pinning values too long for `i64` to its bounds.
fn parse_saturating(digits: &str) -> Option<i64> {
    digits.parse().ok().or_else(|| {
        let (negative, magnitude) = digits
            .strip_prefix('-')
            .map_or((false, digits), |rest| (true, rest));
        (!magnitude.is_empty() && magnitude.bytes().all(|b| b.is_ascii_digit()))
            .then_some(if negative { i64::MIN } else { i64::MAX })
    })
}

fn contains_any(normalized: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| normalized.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpret(text: &str) -> Option<Intent> {
        CommandInterpreter::new().interpret(text)
    }

    #[test]
    fn parses_time_requests() {
        assert_eq!(interpret("set time to 8am"), Some(Intent::SetTime { hour: 8 }));
        assert_eq!(interpret("Set the clock to 6 PM"), Some(Intent::SetTime { hour: 18 }));
        assert_eq!(interpret("jump to 12am"), Some(Intent::SetTime { hour: 0 }));
        assert_eq!(interpret("at 12pm please"), Some(Intent::SetTime { hour: 12 }));
        assert_eq!(interpret("time 14:30"), Some(Intent::SetTime { hour: 14 }));
        assert_eq!(interpret("go to 7 o'clock"), Some(Intent::SetTime { hour: 7 }));
    }

    #[test]
    fn clamps_time() {
        assert_eq!(extract_time("set time to -5"), Some(0));
        assert_eq!(extract_time("set time to 99"), Some(23));
        assert_eq!(extract_time("set time to 11 pm"), Some(23));
        assert_eq!(extract_time("set time to 123"), Some(23));
        assert_eq!(extract_time("set time to 99999999999999999999999"), Some(23));
        assert_eq!(extract_time("what time is it"), None);
    }

    #[test]
    fn parses_and_clamps_temperature() {
        assert_eq!(
            interpret("set temperature to 90"),
            Some(Intent::SetTemperature { fahrenheit: 90 })
        );
        assert_eq!(extract_temperature("temp 130"), Some(120));
        assert_eq!(extract_temperature("temperature -5"), Some(10));
        assert_eq!(extract_temperature("heat it up to 105"), Some(105));
        assert_eq!(extract_temperature("set temperature to 1000"), Some(120));
        assert_eq!(
            extract_temperature("temperature -40000000000000000000"),
            Some(10)
        );
        assert_eq!(
            interpret("set temperature to 1000"),
            Some(Intent::SetTemperature { fahrenheit: 120 })
        );
        assert_eq!(extract_temperature("115 degrees"), None);
    }

    #[test]
    fn matches_scenarios() {
        assert_eq!(
            interpret("evening rush"),
            Some(Intent::StartScenario {
                key: "evening_rush".into()
            })
        );
        assert_eq!(
            interpret("115 degrees"),
            Some(Intent::StartScenario {
                key: "catastrophic_heat".into()
            })
        );
        assert_eq!(
            interpret("  Run a HEAT WAVE  "),
            Some(Intent::StartScenario {
                key: "heatwave".into()
            })
        );
    }

    #[test]
    fn demand_labels_set_the_clock() {
        assert_eq!(
            interpret("set time to evening rush"),
            Some(Intent::SetTime { hour: 17 })
        );
        assert_eq!(
            interpret("Set the clock to Lunch Hour"),
            Some(Intent::SetTime { hour: 12 })
        );
        assert_eq!(
            interpret("time to the late night"),
            Some(Intent::SetTime { hour: 0 })
        );
        let (rule, _) = CommandInterpreter::new()
            .explain("set time to evening")
            .unwrap();
        assert_eq!(rule, ClassifierRule::PatternLabel);
        // Without a clock phrase a label still reads as a scenario.
        assert_eq!(
            interpret("late night"),
            Some(Intent::StartScenario {
                key: "late_night".into()
            })
        );
        assert_eq!(interpret("what time is it in the evening"), Some(Intent::Status));
    }

    #[test]
    fn status_and_suggestions() {
        assert_eq!(interpret("status"), Some(Intent::Status));
        assert_eq!(interpret("What time is it?"), Some(Intent::Status));
        assert_eq!(interpret("what should I do"), Some(Intent::Suggestions));
        assert_eq!(interpret("any ideas?"), Some(Intent::Suggestions));
    }

    #[test]
    fn unrelated_text_is_not_a_command() {
        assert_eq!(interpret("zoom the map to downtown"), None);
        assert_eq!(interpret("   "), None);
    }

    #[test]
    fn earlier_rules_win() {
        let (rule, intent) = CommandInterpreter::new()
            .explain("late night at 3am")
            .unwrap();
        assert_eq!(rule, ClassifierRule::Time);
        assert_eq!(intent, Intent::SetTime { hour: 3 });
        assert_eq!(intent.exclusive_key().as_deref(), Some(TIME_CHANGE_KEY));
        assert_eq!(Intent::Status.exclusive_key(), None);
    }
}
