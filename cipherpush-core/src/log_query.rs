//! Read-only filtering, paging and aggregation over delivery logs.

use crate::models::{mask_value, NoticeLog, NoticeLogFilter, NoticeLogPage, NoticeStatus};
use crate::storage::CredentialStore;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;
const RECENT_LIMIT: usize = 5;

/// Inclusive creation-time window. `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(begin: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { begin, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.begin.map_or(true, |b| at >= b) && self.end.map_or(true, |e| at <= e)
    }
}

/// Calendar bucket for date aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateUnit {
    #[default]
    Day,
    Month,
    Year,
}

impl DateUnit {
    /// Unknown values fall back to `Day`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "month" => Self::Month,
            "year" => Self::Year,
            _ => Self::Day,
        }
    }

    fn layout(&self) -> &'static str {
        match self {
            Self::Day => "%Y-%m-%d",
            Self::Month => "%Y-%m",
            Self::Year => "%Y",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntry {
    pub key: String,
    pub count: usize,
}

/// One line of the dashboard's recent activity list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentLog {
    pub title: String,
    pub group: String,
    pub status: NoticeStatus,
    pub device_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogDashboard {
    pub today_sent: usize,
    pub today_success: usize,
    pub recent_logs: Vec<RecentLog>,
}

pub struct LogQueryEngine {
    store: Arc<dyn CredentialStore>,
}

impl LogQueryEngine {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Filtered, newest-first page. Out-of-range pages come back empty.
    pub fn query(&self, filter: &NoticeLogFilter) -> Result<NoticeLogPage> {
        let logs = self.filtered(filter)?;
        let total = logs.len();

        let page_size = match filter.page_size {
            n if n <= 0 => DEFAULT_PAGE_SIZE,
            n => (n as usize).min(MAX_PAGE_SIZE),
        };
        let page = filter.page.max(1) as usize;

        let start = page
            .saturating_sub(1)
            .saturating_mul(page_size)
            .min(total);
        let end = start.saturating_add(page_size).min(total);

        Ok(NoticeLogPage {
            data: logs[start..end].to_vec(),
            total,
            pages: total.div_ceil(page_size),
            page_num: page,
            page_size,
        })
    }

    pub fn count_by_date(&self, unit: DateUnit, range: TimeRange) -> Result<Vec<CountEntry>> {
        let logs = self.in_range(range)?;
        Ok(tally(
            logs.iter()
                .map(|log| log.created_at.format(unit.layout()).to_string()),
        ))
    }

    pub fn count_by_status(&self, range: TimeRange) -> Result<Vec<CountEntry>> {
        let logs = self.in_range(range)?;
        Ok(tally(logs.iter().map(|log| log.status.as_str().to_string())))
    }

    /// Logs without a group are counted under `DEFAULT`.
    pub fn count_by_group(&self, range: TimeRange) -> Result<Vec<CountEntry>> {
        let logs = self.in_range(range)?;
        Ok(tally(logs.iter().map(|log| {
            let group = log.group.trim();
            if group.is_empty() {
                "DEFAULT".to_string()
            } else {
                group.to_string()
            }
        })))
    }

    /// Counts keyed by device display name, or the raw key when the device
    /// is unknown or unnamed.
    pub fn count_by_device(&self, range: TimeRange) -> Result<Vec<CountEntry>> {
        let logs = self.in_range(range)?;

        let names: HashMap<String, String> = match self.store.list_devices() {
            Ok(devices) => devices
                .iter()
                .filter(|d| !d.device_key.is_empty())
                .map(|d| (d.device_key.clone(), d.display_name().to_string()))
                .collect(),
            Err(e) => {
                debug!(error = %e, "Device names unavailable, counting by key");
                HashMap::new()
            }
        };

        Ok(tally(logs.iter().map(|log| {
            names
                .get(&log.device_key)
                .filter(|name| !name.is_empty())
                .cloned()
                .unwrap_or_else(|| log.device_key.clone())
        })))
    }

    /// Today's (UTC) send/success totals and the most recent entries with
    /// masked delivery keys.
    pub fn dashboard(&self, now: DateTime<Utc>) -> Result<LogDashboard> {
        let logs = self.filtered(&NoticeLogFilter::default())?;
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);

        let today: Vec<&NoticeLog> = logs
            .iter()
            .take_while(|log| log.created_at >= today_start)
            .collect();
        let today_success = today
            .iter()
            .filter(|log| log.status == NoticeStatus::Success)
            .count();

        let recent_logs = logs
            .iter()
            .take(RECENT_LIMIT)
            .map(|log| RecentLog {
                title: log.title.clone(),
                group: log.group.clone(),
                status: log.status,
                device_key: mask_value(&log.device_key),
                created_at: log.created_at,
            })
            .collect();

        Ok(LogDashboard {
            today_sent: today.len(),
            today_success,
            recent_logs,
        })
    }

    fn in_range(&self, range: TimeRange) -> Result<Vec<NoticeLog>> {
        self.filtered(&NoticeLogFilter {
            begin_time: range.begin,
            end_time: range.end,
            ..NoticeLogFilter::default()
        })
    }

    fn filtered(&self, filter: &NoticeLogFilter) -> Result<Vec<NoticeLog>> {
        let range = TimeRange::new(filter.begin_time, filter.end_time);
        let mut logs: Vec<NoticeLog> = self
            .store
            .list_logs()?
            .into_iter()
            .filter(|log| matches_text(&filter.device_key, &log.device_key))
            .filter(|log| matches_text(&filter.group, &log.group))
            .filter(|log| matches_text(&filter.status, log.status.as_str()))
            .filter(|log| range.contains(log.created_at))
            .collect();

        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(logs)
    }
}

fn matches_text(wanted: &str, actual: &str) -> bool {
    wanted.is_empty() || wanted.eq_ignore_ascii_case(actual)
}

fn tally(keys: impl Iterator<Item = String>) -> Vec<CountEntry> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| CountEntry { key, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Device, NoticeRequest};
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn log(key: &str, group: &str, status: NoticeStatus, created_at: DateTime<Utc>) -> NoticeLog {
        let request = NoticeRequest {
            title: format!("to {}", key),
            body: "b".to_string(),
            group: group.to_string(),
            ..NoticeRequest::default()
        };
        let mut entry = NoticeLog::new(key, String::new(), &request, status, String::new());
        entry.created_at = created_at;
        entry
    }

    fn engine_with(logs: Vec<NoticeLog>) -> (LogQueryEngine, MemoryStore) {
        let store = MemoryStore::new();
        for entry in logs {
            store.append_log(entry).unwrap();
        }
        (LogQueryEngine::new(Arc::new(store.clone())), store)
    }

    #[test]
    fn third_page_of_twenty_five() {
        let base = at(2024, 1, 1, 0);
        let logs = (0..25)
            .map(|i| log("k1", "", NoticeStatus::Success, base + Duration::minutes(i)))
            .collect();
        let (engine, _) = engine_with(logs);

        let page = engine
            .query(&NoticeLogFilter {
                page: 3,
                page_size: 10,
                ..NoticeLogFilter::default()
            })
            .unwrap();
        assert_eq!(page.data.len(), 5);
        assert_eq!(page.pages, 3);
        assert_eq!(page.total, 25);
        // newest first: the last page holds the five oldest entries
        assert_eq!(page.data[0].created_at, base + Duration::minutes(4));
        assert_eq!(page.data[4].created_at, base);
    }

    #[test]
    fn page_parameters_are_clamped() {
        let base = at(2024, 1, 1, 0);
        let logs = (0..3)
            .map(|i| log("k1", "", NoticeStatus::Success, base + Duration::minutes(i)))
            .collect();
        let (engine, _) = engine_with(logs);

        let page = engine.query(&NoticeLogFilter::default()).unwrap();
        assert_eq!(page.page_num, 1);
        assert_eq!(page.page_size, 10);
        assert_eq!(page.data.len(), 3);

        let page = engine
            .query(&NoticeLogFilter {
                page_size: 1000,
                ..NoticeLogFilter::default()
            })
            .unwrap();
        assert_eq!(page.page_size, 100);

        let page = engine
            .query(&NoticeLogFilter {
                page: 99,
                ..NoticeLogFilter::default()
            })
            .unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn filters_are_case_insensitive_and_time_inclusive() {
        let (engine, _) = engine_with(vec![
            log("k1", "Ops", NoticeStatus::Success, at(2024, 1, 1, 8)),
            log("k2", "ops", NoticeStatus::Failed, at(2024, 1, 2, 8)),
            log("k1", "dev", NoticeStatus::Failed, at(2024, 1, 3, 8)),
        ]);

        let page = engine
            .query(&NoticeLogFilter {
                group: "OPS".to_string(),
                ..NoticeLogFilter::default()
            })
            .unwrap();
        assert_eq!(page.total, 2);

        let page = engine
            .query(&NoticeLogFilter {
                device_key: "K1".to_string(),
                status: "failed".to_string(),
                ..NoticeLogFilter::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);

        let page = engine
            .query(&NoticeLogFilter {
                begin_time: Some(at(2024, 1, 2, 8)),
                end_time: Some(at(2024, 1, 3, 8)),
                ..NoticeLogFilter::default()
            })
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let t = at(2024, 1, 1, 0);
        let (engine, _) = engine_with(vec![
            log("first", "", NoticeStatus::Success, t),
            log("second", "", NoticeStatus::Success, t),
        ]);
        let page = engine.query(&NoticeLogFilter::default()).unwrap();
        assert_eq!(page.data[0].device_key, "second");
    }

    #[test]
    fn count_by_date_buckets() {
        let (engine, _) = engine_with(vec![
            log("k1", "", NoticeStatus::Success, at(2024, 2, 1, 8)),
            log("k1", "", NoticeStatus::Success, at(2024, 1, 31, 8)),
            log("k1", "", NoticeStatus::Success, at(2024, 1, 31, 20)),
            log("k1", "", NoticeStatus::Success, at(2023, 12, 1, 8)),
        ]);

        let days = engine
            .count_by_date(DateUnit::Day, TimeRange::default())
            .unwrap();
        assert_eq!(
            days,
            vec![
                CountEntry { key: "2023-12-01".to_string(), count: 1 },
                CountEntry { key: "2024-01-31".to_string(), count: 2 },
                CountEntry { key: "2024-02-01".to_string(), count: 1 },
            ]
        );

        let months = engine
            .count_by_date(DateUnit::parse("MONTH"), TimeRange::default())
            .unwrap();
        assert_eq!(months.len(), 3);

        let years = engine
            .count_by_date(
                DateUnit::Year,
                TimeRange::new(Some(at(2024, 1, 1, 0)), None),
            )
            .unwrap();
        assert_eq!(years, vec![CountEntry { key: "2024".to_string(), count: 3 }]);
    }

    #[test]
    fn count_by_status_and_group() {
        let t = at(2024, 1, 1, 0);
        let (engine, _) = engine_with(vec![
            log("k1", "", NoticeStatus::Success, t),
            log("k1", " ", NoticeStatus::Failed, t),
            log("k1", "alerts", NoticeStatus::Success, t),
        ]);

        let statuses = engine.count_by_status(TimeRange::default()).unwrap();
        assert_eq!(statuses[0], CountEntry { key: "FAILED".to_string(), count: 1 });
        assert_eq!(statuses[1], CountEntry { key: "SUCCESS".to_string(), count: 2 });

        let groups = engine.count_by_group(TimeRange::default()).unwrap();
        assert_eq!(groups[0], CountEntry { key: "DEFAULT".to_string(), count: 2 });
        assert_eq!(groups[1], CountEntry { key: "alerts".to_string(), count: 1 });
    }

    #[test]
    fn count_by_device_prefers_names() {
        let t = at(2024, 1, 1, 0);
        let (engine, store) = engine_with(vec![
            log("k1", "", NoticeStatus::Success, t),
            log("k1", "", NoticeStatus::Success, t),
            log("k2", "", NoticeStatus::Success, t),
            log("gone", "", NoticeStatus::Failed, t),
        ]);
        let mut named = Device::new("tok-1");
        named.device_key = "k1".to_string();
        named.name = "Phone".to_string();
        store.upsert_device(named).unwrap();
        let mut unnamed = Device::new("tok-2");
        unnamed.device_key = "k2".to_string();
        store.upsert_device(unnamed).unwrap();

        let counts = engine.count_by_device(TimeRange::default()).unwrap();
        let keys: Vec<&str> = counts.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["Phone", "gone", "k2"]);
        assert_eq!(counts[0].count, 2);
    }

    #[test]
    fn dashboard_counts_today_only() {
        let now = at(2024, 5, 10, 12);
        let mut logs = vec![
            log("yesterday-key", "", NoticeStatus::Success, at(2024, 5, 9, 23)),
            log("device-key-1", "", NoticeStatus::Success, at(2024, 5, 10, 1)),
            log("device-key-2", "", NoticeStatus::Failed, at(2024, 5, 10, 2)),
        ];
        for h in 3..8 {
            logs.push(log("device-key-3", "", NoticeStatus::Success, at(2024, 5, 10, h)));
        }
        let (engine, _) = engine_with(logs);

        let dash = engine.dashboard(now).unwrap();
        assert_eq!(dash.today_sent, 7);
        assert_eq!(dash.today_success, 6);
        assert_eq!(dash.recent_logs.len(), 5);
        assert_eq!(dash.recent_logs[0].device_key, "devi********");
        assert_eq!(dash.recent_logs[0].created_at, at(2024, 5, 10, 7));
    }
}
