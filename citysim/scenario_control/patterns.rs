//! Hour-of-day demand table.

use serde::Serialize;

/// Expected traffic demand for a contiguous span of hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DemandBucket {
    /// First hour covered (inclusive).
    pub start_hour: u8,
    /// Hour at which the bucket ends (exclusive, at most 24).
    pub end_hour: u8,
    /// Lower bound of the expected vehicle population.
    pub min_vehicles: u32,
    /// Upper bound of the expected vehicle population.
    pub max_vehicles: u32,
    /// Share of spawned vehicles that are electric, in `[0, 1]`.
    pub ev_fraction: f64,
    /// Human readable label.
    pub label: &'static str,
    /// Dashboard icon.
    pub icon: &'static str,
}

impl DemandBucket {
    /// Returns true if `hour` lies in `[start_hour, end_hour)`.
    #[must_use]
    pub const fn contains(&self, hour: u8) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }

    /// Minimum population the quota maintainer keeps for this bucket.
    #[must_use]
    pub const fn quota_target(&self) -> u32 {
        self.min_vehicles
    }

    /// Number of hours covered.
    #[must_use]
    pub const fn span(&self) -> u8 {
        self.end_hour - self.start_hour
    }
}

const fn bucket(
    start_hour: u8,
    end_hour: u8,
    vehicles: (u32, u32),
    ev_fraction: f64,
    label: &'static str,
    icon: &'static str,
) -> DemandBucket {
    DemandBucket {
        start_hour,
        end_hour,
        min_vehicles: vehicles.0,
        max_vehicles: vehicles.1,
        ev_fraction,
        label,
        icon,
    }
}

/// Demand buckets in hour order. They partition `[0, 24)`.
pub const DEMAND_PATTERNS: [DemandBucket; 9] = [
    bucket(0, 5, (8, 15), 0.70, "Late Night", "🌙"),
    bucket(5, 7, (20, 35), 0.70, "Early Morning", "🌅"),
    bucket(7, 10, (70, 100), 0.65, "Morning Rush", "🚗"),
    bucket(10, 12, (40, 60), 0.70, "Late Morning", "☀️"),
    bucket(12, 14, (50, 70), 0.70, "Lunch Hour", "🥪"),
    bucket(14, 17, (45, 65), 0.70, "Afternoon", "🌤️"),
    bucket(17, 19, (80, 110), 0.65, "Evening Rush", "🚦"),
    bucket(19, 22, (35, 55), 0.70, "Evening", "🌆"),
    bucket(22, 24, (15, 25), 0.75, "Night", "🌃"),
];

/// Returned for hours no bucket claims. Only reachable with an out-of-range hour.
pub const FALLBACK_BUCKET: DemandBucket = bucket(0, 24, (40, 60), 0.70, "Daytime", "🏙️");

/// First bucket containing `hour`, or [`FALLBACK_BUCKET`].
#[must_use]
pub fn bucket_for(hour: u8) -> &'static DemandBucket {
    DEMAND_PATTERNS
        .iter()
        .find(|bucket| bucket.contains(hour))
        .unwrap_or(&FALLBACK_BUCKET)
}

/// Bucket whose label opens `text`, ignoring case. The longest label wins,
/// so "evening rush" picks Evening Rush over Evening.
#[must_use]
pub fn bucket_labelled(text: &str) -> Option<&'static DemandBucket> {
    DEMAND_PATTERNS
        .iter()
        .filter(|bucket| {
            let label = bucket.label;
            text.get(..label.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(label))
                && !text[label.len()..]
                    .chars()
                    .next()
                    .is_some_and(char::is_alphanumeric)
        })
        .max_by_key(|bucket| bucket.label.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_hour_has_exactly_one_bucket() {
        for hour in 0..24u8 {
            let matching = DEMAND_PATTERNS.iter().filter(|b| b.contains(hour)).count();
            assert_eq!(matching, 1, "hour {hour} matched {matching} buckets");
            assert_ne!(bucket_for(hour).label, FALLBACK_BUCKET.label);
        }
    }

    #[test]
    fn buckets_are_contiguous() {
        assert_eq!(DEMAND_PATTERNS[0].start_hour, 0);
        assert_eq!(DEMAND_PATTERNS[DEMAND_PATTERNS.len() - 1].end_hour, 24);
        for pair in DEMAND_PATTERNS.windows(2) {
            assert_eq!(pair[0].end_hour, pair[1].start_hour);
        }
        let covered: u32 = DEMAND_PATTERNS.iter().map(|b| u32::from(b.span())).sum();
        assert_eq!(covered, 24);
    }

    #[test]
    fn ranges_and_fractions_are_sane() {
        for bucket in &DEMAND_PATTERNS {
            assert!(bucket.min_vehicles <= bucket.max_vehicles);
            assert!((0.0..=1.0).contains(&bucket.ev_fraction));
        }
    }

    #[test]
    fn labels_select_buckets() {
        assert_eq!(bucket_labelled("evening rush").unwrap().start_hour, 17);
        assert_eq!(bucket_labelled("evening").unwrap().start_hour, 19);
        assert_eq!(bucket_labelled("Late Night please").unwrap().start_hour, 0);
        assert_eq!(bucket_labelled("night").unwrap().start_hour, 22);
        assert!(bucket_labelled("nightly").is_none());
        assert!(bucket_labelled("downtown").is_none());
    }

    #[test]
    fn out_of_range_hour_falls_back() {
        assert_eq!(bucket_for(24), &FALLBACK_BUCKET);
        assert_eq!(bucket_for(8).label, "Morning Rush");
        assert_eq!(bucket_for(18).quota_target(), 80);
    }
}
