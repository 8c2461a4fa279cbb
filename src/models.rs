use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// One shortened link, persisted as a single document keyed by its code.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRecord {
    #[serde(rename = "_id")]
    pub code: String,
    pub long_url: Url,
    pub visits: u32,
    pub created_at: DateTime<Utc>,
    // Documents written before per-day tracking existed have no analytics
    // field; read those as an empty history.
    #[serde(default)]
    pub analytics: Vec<DayVisits>,
}

/// Visit count for one UTC calendar day. A record holds at most one
/// bucket per day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DayVisits {
    pub date: NaiveDate,
    pub visits: u32,
}

impl UrlRecord {
    pub fn new(code: String, long_url: Url) -> Self {
        Self {
            code,
            long_url,
            visits: 0,
            created_at: Utc::now(),
            analytics: Vec::new(),
        }
    }

    /// Counts one visit on `day`: bumps the running total and the day's
    /// bucket, appending a fresh bucket on the day's first visit.
    pub fn apply_visit(&mut self, day: NaiveDate) {
        self.visits += 1;
        match self.analytics.iter_mut().find(|entry| entry.date == day) {
            Some(entry) => entry.visits += 1,
            None => self.analytics.push(DayVisits {
                date: day,
                visits: 1,
            }),
        }
    }
}

/// Row shape served by the analytics listing.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsItem {
    pub code: String,
    pub long_url: Url,
    pub visits: u32,
    pub analytics: Vec<DayVisits>,
}

impl From<UrlRecord> for AnalyticsItem {
    fn from(record: UrlRecord) -> Self {
        Self {
            code: record.code,
            long_url: record.long_url,
            visits: record.visits,
            analytics: record.analytics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(text: &str) -> NaiveDate {
        text.parse().unwrap()
    }

    fn record() -> UrlRecord {
        UrlRecord::new(
            "abc123".to_owned(),
            Url::parse("https://example.com/page").unwrap(),
        )
    }

    #[test]
    fn new_record_starts_unvisited() {
        let record = record();
        assert_eq!(record.visits, 0);
        assert!(record.analytics.is_empty());
    }

    #[test]
    fn same_day_visits_share_one_bucket() {
        let mut record = record();
        record.apply_visit(day("2026-08-07"));
        record.apply_visit(day("2026-08-07"));

        assert_eq!(record.visits, 2);
        assert_eq!(
            record.analytics,
            vec![DayVisits {
                date: day("2026-08-07"),
                visits: 2,
            }]
        );
    }

    #[test]
    fn visits_across_days_get_separate_buckets() {
        let mut record = record();
        record.apply_visit(day("2026-08-07"));
        record.apply_visit(day("2026-08-08"));
        record.apply_visit(day("2026-08-08"));

        assert_eq!(record.visits, 3);
        assert_eq!(record.analytics.len(), 2);
        assert_eq!(record.analytics[0].visits, 1);
        assert_eq!(record.analytics[1].visits, 2);
    }

    #[test]
    fn total_matches_bucket_sum() {
        let mut record = record();
        for text in ["2026-08-05", "2026-08-05", "2026-08-06", "2026-08-07"] {
            record.apply_visit(day(text));
        }

        let bucket_sum: u32 = record.analytics.iter().map(|entry| entry.visits).sum();
        assert_eq!(record.visits, bucket_sum);
    }
}
