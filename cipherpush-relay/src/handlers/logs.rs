//! Delivery log listing and statistics handlers.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use cipherpush_core::{
    CountEntry, DateUnit, LogDashboard, NoticeLogFilter, NoticeLogPage, TimeRange,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogListQuery {
    pub device_key: String,
    pub group: String,
    pub status: String,
    pub begin_time: String,
    pub end_time: String,
    pub page: String,
    pub page_size: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RangeQuery {
    pub begin_time: String,
    pub end_time: String,
    pub date_type: String,
}

impl RangeQuery {
    fn range(&self) -> TimeRange {
        TimeRange::new(parse_time(&self.begin_time), parse_time(&self.end_time))
    }
}

/// Parse an RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` timestamp.
/// Zone-less forms are taken as UTC. Anything else is ignored.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Non-numeric paging values fall through to the engine's defaults.
fn parse_number(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

fn labelled(entries: Vec<CountEntry>, label: &str) -> Json<Vec<serde_json::Value>> {
    Json(
        entries
            .into_iter()
            .map(|e| serde_json::json!({ label: e.key, "count": e.count }))
            .collect(),
    )
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<LogListQuery>,
) -> Result<Json<NoticeLogPage>, RelayError> {
    let filter = NoticeLogFilter {
        device_key: q.device_key.trim().to_string(),
        group: q.group.trim().to_string(),
        status: q.status.trim().to_string(),
        begin_time: parse_time(&q.begin_time),
        end_time: parse_time(&q.end_time),
        page: parse_number(&q.page),
        page_size: parse_number(&q.page_size),
    };
    Ok(Json(state.logs.query(&filter)?))
}

pub async fn count_by_date(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<serde_json::Value>>, RelayError> {
    let entries = state
        .logs
        .count_by_date(DateUnit::parse(&q.date_type), q.range())?;
    Ok(labelled(entries, "date"))
}

pub async fn count_by_status(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<serde_json::Value>>, RelayError> {
    Ok(labelled(state.logs.count_by_status(q.range())?, "status"))
}

pub async fn count_by_group(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<serde_json::Value>>, RelayError> {
    Ok(labelled(state.logs.count_by_group(q.range())?, "group"))
}

pub async fn count_by_device(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<serde_json::Value>>, RelayError> {
    Ok(labelled(state.logs.count_by_device(q.range())?, "device"))
}

pub async fn summary(State(state): State<AppState>) -> Result<Json<LogDashboard>, RelayError> {
    Ok(Json(state.logs.dashboard(Utc::now())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support;
    use chrono::TimeZone;
    use cipherpush_core::{DeviceRequest, NoticeRequest};

    #[test]
    fn parses_supported_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        assert_eq!(parse_time("2024-03-05T14:30:00Z"), Some(expected));
        assert_eq!(parse_time("2024-03-05T22:30:00+08:00"), Some(expected));
        assert_eq!(parse_time("2024-03-05 14:30:00"), Some(expected));
        assert_eq!(
            parse_time(" 2024-03-05 "),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn unparseable_times_are_ignored() {
        assert_eq!(parse_time(""), None);
        assert_eq!(parse_time("yesterday"), None);
        assert_eq!(parse_time("2024/03/05"), None);
    }

    #[test]
    fn paging_numbers_default_to_zero() {
        assert_eq!(parse_number("3"), 3);
        assert_eq!(parse_number("abc"), 0);
        assert_eq!(parse_number(""), 0);
    }

    #[tokio::test]
    async fn list_and_counts_after_broadcast() {
        let (state, _) = test_support::state();
        state
            .registry
            .upsert(DeviceRequest {
                device_token: "tok-1".to_string(),
                name: "Phone".to_string(),
                ..DeviceRequest::default()
            })
            .await
            .unwrap();
        for _ in 0..3 {
            state
                .dispatch
                .broadcast(NoticeRequest {
                    body: "b".to_string(),
                    ..NoticeRequest::default()
                })
                .await
                .unwrap();
        }

        let Json(page) = list(
            State(state.clone()),
            Query(LogListQuery {
                page_size: "2".to_string(),
                ..LogListQuery::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
        assert_eq!(page.data.len(), 2);

        let Json(by_device) = count_by_device(State(state.clone()), Query(RangeQuery::default()))
            .await
            .unwrap();
        assert_eq!(by_device, vec![serde_json::json!({"device": "Phone", "count": 3})]);

        let Json(by_group) = count_by_group(State(state.clone()), Query(RangeQuery::default()))
            .await
            .unwrap();
        assert_eq!(by_group, vec![serde_json::json!({"group": "DEFAULT", "count": 3})]);

        let Json(dash) = summary(State(state)).await.unwrap();
        assert_eq!(dash.today_sent, 3);
        assert_eq!(dash.today_success, 3);
    }
}
