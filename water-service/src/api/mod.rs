//! HTTP surface: reading ingestion and the report endpoints.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use water_client::{HourlySnapshot, KeyRange, Reading, ReadingStore, SortOrder};

use crate::{
    calendar::{parse_target_date, Granularity},
    consumption::{validate_device_id, ConsumptionReport, ConsumptionService},
    error::{ApiError, ApiResult},
    locator::{self, DeviceReport, HourlyUsage},
    pipeline::Envelope,
    rollup::now_epoch,
    sources::{ReadingIngress, ReadingSubmission},
    transform::validate_reading,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReadingStore>,
    pub consumption: Arc<ConsumptionService>,
    pub ingress: ReadingIngress,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/readings", post(ingest_reading))
        .route("/readings/latest", get(latest_reading))
        .route("/consumption", get(consumption))
        .route("/snapshots", get(snapshots))
        .route("/reports/hourly", get(hourly_report))
        .route("/reports/hourly/usage", get(hourly_usage))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceQuery {
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumptionQuery {
    device_id: Option<String>,
    time_filter: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeQuery {
    device_id: Option<String>,
    start_timestamp: Option<String>,
    end_timestamp: Option<String>,
}

impl RangeQuery {
    fn parse(&self) -> ApiResult<(&str, i64, i64)> {
        let device_id = validate_device_id(self.device_id.as_deref().unwrap_or_default())?;
        let start = parse_epoch("startTimestamp", self.start_timestamp.as_deref())?;
        let end = parse_epoch("endTimestamp", self.end_timestamp.as_deref())?;
        Ok((device_id, start, end))
    }
}

fn parse_epoch(name: &str, raw: Option<&str>) -> ApiResult<i64> {
    let raw = raw.ok_or_else(|| ApiError::bad_request(format!("{name} is required")))?;
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("{name} must be epoch seconds, got '{raw}'")))
}

async fn ingest_reading(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Reading>)> {
    metrics::counter!("http_reading_ingest_requests_total").increment(1);

    let submission: ReadingSubmission = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid reading submission: {e}")))?;
    let reading = submission
        .into_reading(now_epoch())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let reading = validate_reading(Envelope::new(reading))?.payload;

    state.ingress.submit(reading.clone()).await?;
    tracing::debug!(
        device_id = %reading.device_id,
        timestamp = reading.timestamp,
        "accepted reading"
    );

    Ok((StatusCode::ACCEPTED, Json(reading)))
}

async fn latest_reading(
    State(state): State<AppState>,
    Query(q): Query<DeviceQuery>,
) -> ApiResult<Json<Reading>> {
    let reading = state
        .consumption
        .latest_reading(q.device_id.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(reading))
}

async fn consumption(
    State(state): State<AppState>,
    Query(q): Query<ConsumptionQuery>,
) -> ApiResult<Json<ConsumptionReport>> {
    let granularity: Granularity = q
        .time_filter
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("timeFilter is required"))?
        .parse()?;
    let target = q.date.as_deref().map(parse_target_date).transpose()?;

    let report = state
        .consumption
        .report(q.device_id.as_deref().unwrap_or_default(), granularity, target)
        .await?;
    Ok(Json(report))
}

async fn snapshots(
    State(state): State<AppState>,
    Query(q): Query<DeviceQuery>,
) -> ApiResult<Json<Vec<HourlySnapshot>>> {
    let device_id = validate_device_id(q.device_id.as_deref().unwrap_or_default())?;
    let snapshots = state
        .store
        .query_snapshots(device_id, KeyRange::all(), SortOrder::Asc, None)
        .await?;
    Ok(Json(snapshots))
}

async fn hourly_report(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<DeviceReport>> {
    let (device_id, start, end) = q.parse()?;
    let report = locator::hourly_report(state.store.as_ref(), device_id, start, end).await?;
    Ok(Json(report))
}

async fn hourly_usage(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<Vec<HourlyUsage>>> {
    let (device_id, start, end) = q.parse()?;
    let usage = locator::hourly_usage(state.store.as_ref(), device_id, start, end).await?;
    Ok(Json(usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use futures::StreamExt;
    use tower::ServiceExt;
    use water_client::MemoryStore;

    use crate::{
        calendar::ReferenceZone,
        consumption::BaselineMode,
        pipeline::Source,
        sources::HttpReadingSource,
    };

    async fn test_app(readings: &[Reading]) -> (Router, HttpReadingSource, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.put_readings(readings).await.unwrap();
        let consumption = Arc::new(ConsumptionService::new(
            store.clone(),
            ReferenceZone::utc(),
            BaselineMode::Lookback,
            10_000,
        ));
        let (source, ingress) = HttpReadingSource::new(8);
        let state = AppState {
            store: store.clone(),
            consumption,
            ingress,
        };
        (router(state), source, store)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn consumption_returns_bucketed_report() {
        let (app, _source, _store) = test_app(&[
            Reading::new("D1", 1_718_409_600 + 60, 10, 0),
            Reading::new("D1", 1_718_409_600 + 3_700, 12, 500),
        ])
        .await;

        let (status, body) =
            get_json(app, "/consumption?deviceId=D1&timeFilter=day&date=2024-06-15").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["labels"].as_array().unwrap().len(), 24);
        assert_eq!(body["data"][0], 10.0);
        assert_eq!(body["data"][1], 2.5);
        assert_eq!(body["startTime"], 1_718_409_600);
    }

    #[tokio::test]
    async fn unknown_time_filter_is_bad_request() {
        let (app, _source, _store) = test_app(&[]).await;
        let (status, body) = get_json(app, "/consumption?deviceId=D1&timeFilter=week").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("week"));
    }

    #[tokio::test]
    async fn missing_device_id_is_bad_request() {
        let (app, _source, _store) = test_app(&[]).await;
        let (status, _) = get_json(app, "/consumption?timeFilter=month").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn latest_reading_404_when_absent() {
        let (app, _source, _store) = test_app(&[Reading::new("D1", 5, 1, 0)]).await;
        let (status, body) = get_json(app.clone(), "/readings/latest?deviceId=D1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["readingId"], "D1-5");

        let (status, _) = get_json(app, "/readings/latest?deviceId=D2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_reading_is_stamped_and_queued() {
        let (app, source, _store) = test_app(&[]).await;
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/readings")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"DeviceID": 77, "Liters": 3.7, "Milliliters": 120}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let mut stream = source.stream().await;
        let queued = stream.next().await.unwrap().unwrap().payload;
        assert_eq!(queued.device_id, "77");
        assert_eq!(queued.liters, 3);
        assert_eq!(queued.milliliters, 120);
        assert!(queued.timestamp > 1_700_000_000);
    }

    #[tokio::test]
    async fn post_invalid_reading_is_rejected() {
        let (app, _source, _store) = test_app(&[]).await;
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/readings")
                    .body(Body::from(r#"{"DeviceID": "D1", "Liters": 1, "Milliliters": 4000}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn hourly_endpoints_use_snapshots() {
        let (app, _source, store) = test_app(&[]).await;
        for (fetch, flow) in [(3_600, 1.0), (7_200, 4.0), (10_800, 4.5)] {
            store
                .put_snapshot(&HourlySnapshot::new("D1", fetch - 10, fetch, flow))
                .await
                .unwrap();
        }

        let (status, body) = get_json(
            app.clone(),
            "/reports/hourly?deviceId=D1&startTimestamp=3600&endTimestamp=10800",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["readings"].as_array().unwrap().len(), 3);
        assert_eq!(body["peakUsage"], 3.0);
        assert_eq!(body["averageUsage"], 1.75);

        let (_, body) = get_json(
            app.clone(),
            "/reports/hourly/usage?deviceId=D1&startTimestamp=3600&endTimestamp=10800",
        )
        .await;
        assert_eq!(body[1]["usage"], 0.5);

        let (status, _) = get_json(
            app.clone(),
            "/reports/hourly?deviceId=D1&startTimestamp=10800&endTimestamp=3600",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = get_json(app, "/snapshots?deviceId=D1").await;
        assert_eq!(body.as_array().unwrap().len(), 3);
    }
}
