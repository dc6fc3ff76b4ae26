//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::{
    domain::UserId,
    infrastructure::dto::http::PresenceStateDto,
    ui::state::AppState,
    usecase::{ConnectionStats, PatternReport, QualityScore, ReconnectionStats},
};

use super::parse_target;

const DEFAULT_HOURS: u32 = 24;
const MAX_HOURS: u32 = 24 * 30;

/// Query parameters for time-windowed statistics
#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<u32>,
}

impl WindowQuery {
    fn hours(&self) -> Result<u32, StatusCode> {
        match self.hours.unwrap_or(DEFAULT_HOURS) {
            hours @ 1..=MAX_HOURS => Ok(hours),
            hours => {
                tracing::warn!("Rejected analysis window of {}h", hours);
                Err(StatusCode::BAD_REQUEST)
            }
        }
    }
}

type TargetPath = Path<(String, String, String)>;

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Current presence of a user in a context
pub async fn get_presence_state(
    State(state): State<Arc<AppState>>,
    Path((user_id, context_type, context_id)): TargetPath,
) -> Result<Json<PresenceStateDto>, StatusCode> {
    let (user_id, context) = parse_target(user_id, &context_type, &context_id)?;

    match state
        .coordinator
        .get_connection_record(&user_id, &context)
        .await
    {
        // Domain Model から DTO への変換
        Ok(Some(record)) => Ok(Json(PresenceStateDto::from(&record))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to read presence of '{}': {}", user_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Anomalous connection patterns within the analysis window
pub async fn get_presence_patterns(
    State(state): State<Arc<AppState>>,
    Path((user_id, context_type, context_id)): TargetPath,
) -> Result<Json<PatternReport>, StatusCode> {
    let (user_id, context) = parse_target(user_id, &context_type, &context_id)?;
    let report = state
        .coordinator
        .detect_anomalous_patterns(&user_id, &context)
        .await;
    Ok(Json(report))
}

/// 0-100 connection quality score
pub async fn get_presence_quality(
    State(state): State<Arc<AppState>>,
    Path((user_id, context_type, context_id)): TargetPath,
) -> Result<Json<QualityScore>, StatusCode> {
    let (user_id, context) = parse_target(user_id, &context_type, &context_id)?;
    state
        .coordinator
        .get_connection_quality_score(&user_id, &context)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to score connection of '{}': {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// Reconnection count and average outage for a context
pub async fn get_reconnection_stats(
    State(state): State<Arc<AppState>>,
    Path((user_id, context_type, context_id)): TargetPath,
    Query(query): Query<WindowQuery>,
) -> Result<Json<ReconnectionStats>, StatusCode> {
    let (user_id, context) = parse_target(user_id, &context_type, &context_id)?;
    let hours = query.hours()?;
    state
        .coordinator
        .get_reconnection_stats(&user_id, &context, hours)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to read reconnection stats of '{}': {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// Connection stats across every context of a user
pub async fn get_presence_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<ConnectionStats>, StatusCode> {
    let user_id = UserId::new(user_id).map_err(|e| {
        tracing::warn!("Invalid user_id: {}", e);
        StatusCode::BAD_REQUEST
    })?;
    let hours = query.hours()?;
    state
        .coordinator
        .get_connection_quality(&user_id, hours)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to read connection stats of '{}': {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
