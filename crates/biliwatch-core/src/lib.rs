//! Core domain model and count-normalization helpers for biliwatch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "biliwatch-core";

/// One trending-catalog entry as handed from the acquisition pipeline into the
/// snapshot store. Identity is `bvid` when the platform issued one, `aid`
/// otherwise; both may be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VideoRecord {
    pub bvid: Option<String>,
    pub aid: Option<i64>,
    pub cid: Option<i64>,
    pub title: String,
    pub pic: Option<String>,
    pub view: Option<i64>,
    /// Live-viewer display string as sampled, e.g. "1.2万+". The catalog cycle
    /// always writes "0" here; only the online-count cycle samples this.
    pub online_count: String,
    pub tid_v2: Option<i64>,
    pub copyright: Option<i64>,
}

/// One persisted (video, day) row, including the running live-viewer maximum
/// carried forward across days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSnapshot {
    pub bvid: Option<String>,
    pub aid: Option<i64>,
    pub cid: Option<i64>,
    pub title: String,
    pub pic: Option<String>,
    pub view_count: Option<i64>,
    pub online_count: String,
    pub online_count_num: i64,
    pub max_online_count: i64,
    pub max_online_time: Option<DateTime<Utc>>,
    pub tid_v2: Option<i64>,
    pub copyright: Option<i64>,
    pub crawl_date: String,
    pub crawl_time: DateTime<Utc>,
}

/// Canonicalize a locale-formatted viewer-count string into an integer.
///
/// A trailing `+` means "at least" and is dropped. The "万" marker multiplies
/// the preceding decimal by 10,000. Anything unparseable maps to 0 — callers
/// must treat 0 as "unknown" where the distinction matters.
pub fn normalize_count(raw: &str) -> i64 {
    let cleaned = raw.trim().replace('+', "");
    if let Some((magnitude, _)) = cleaned.split_once('万') {
        magnitude
            .trim()
            .parse::<f64>()
            .map(|v| (v * 10_000.0) as i64)
            .unwrap_or(0)
    } else {
        cleaned.parse::<f64>().map(|v| v as i64).unwrap_or(0)
    }
}

/// Display inverse of [`normalize_count`] for counts of 10,000 and above.
pub fn format_count(count: i64) -> String {
    if count >= 10_000 {
        format!("{:.1}万", count as f64 / 10_000.0)
    } else {
        count.to_string()
    }
}

/// Platform bvid format check: "BV" prefix, 12 characters total.
pub fn validate_bvid(bvid: &str) -> bool {
    bvid.starts_with("BV") && bvid.chars().count() == 12
}

/// Static main-zone → sub-zone-id expansion table. The contents are external
/// configuration shipped as JSON; an empty table makes main-zone filters fall
/// back to matching the main id directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneTable(pub HashMap<String, Vec<i64>>);

impl ZoneTable {
    pub fn sub_zones(&self, main_zone: &str) -> &[i64] {
        self.0.get(main_zone).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_magnitude_marker() {
        assert_eq!(normalize_count("1.2万"), 12_000);
        assert_eq!(normalize_count("10万+"), 100_000);
        assert_eq!(normalize_count("3万"), 30_000);
    }

    #[test]
    fn normalize_strips_at_least_suffix() {
        assert_eq!(normalize_count("5000+"), 5_000);
    }

    #[test]
    fn normalize_plain_and_fractional_decimals_truncate() {
        assert_eq!(normalize_count("123"), 123);
        assert_eq!(normalize_count("123.7"), 123);
    }

    #[test]
    fn normalize_returns_zero_on_garbage() {
        assert_eq!(normalize_count("abc"), 0);
        assert_eq!(normalize_count(""), 0);
        assert_eq!(normalize_count("万"), 0);
    }

    #[test]
    fn normalize_is_idempotent_on_well_formed_input() {
        for raw in ["1.2万", "5000+", "123", "88万+"] {
            let once = normalize_count(raw);
            assert_eq!(normalize_count(&once.to_string()), once);
        }
    }

    #[test]
    fn format_count_round_trips_through_normalize() {
        assert_eq!(format_count(12_000), "1.2万");
        assert_eq!(format_count(9_999), "9999");
        assert_eq!(normalize_count(&format_count(12_000)), 12_000);
    }

    #[test]
    fn bvid_format_check() {
        assert!(validate_bvid("BV1xx411c7mD"));
        assert!(!validate_bvid(""));
        assert!(!validate_bvid("BV123"));
        assert!(!validate_bvid("AV1xx411c7mD"));
    }

    #[test]
    fn zone_table_expands_known_mains_only() {
        let mut table = ZoneTable::default();
        table.0.insert("1008".to_string(), vec![2064, 2065]);
        assert_eq!(table.sub_zones("1008"), &[2064, 2065]);
        assert!(table.sub_zones("9999").is_empty());
    }
}
