use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::domain::{Match, MlModel, Prediction};
use crate::metrics::{MetricsAggregator, RoundMetrics};
use crate::storage::TipStore;

type HandlerResult<T> = std::result::Result<Json<T>, (StatusCode, String)>;

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Debug, Deserialize)]
pub struct SeasonQuery {
    pub season: Option<i32>,
}

impl SeasonQuery {
    fn season_or_current(&self) -> i32 {
        self.season.unwrap_or_else(|| Utc::now().year())
    }
}

/// GET /api/matches?season=
pub async fn get_matches(
    State(state): State<AppState>,
    Query(query): Query<SeasonQuery>,
) -> HandlerResult<Vec<Match>> {
    let mut matches = state
        .store
        .matches_for_season(query.season_or_current())
        .await
        .map_err(internal_error)?;
    matches.sort_by_key(|m| (m.round_number, m.start_date_time));

    Ok(Json(matches))
}

/// GET /api/predictions?season=
pub async fn get_predictions(
    State(state): State<AppState>,
    Query(query): Query<SeasonQuery>,
) -> HandlerResult<Vec<Prediction>> {
    let predictions = state
        .store
        .predictions_for_season(query.season_or_current())
        .await
        .map_err(internal_error)?;

    Ok(Json(predictions))
}

/// GET /api/metrics?season=
pub async fn get_metrics(
    State(state): State<AppState>,
    Query(query): Query<SeasonQuery>,
) -> HandlerResult<Vec<RoundMetrics>> {
    let aggregator = MetricsAggregator::new(state.store.clone(), state.bits_policy);
    let metrics = aggregator
        .latest_metrics(query.season_or_current())
        .await
        .map_err(internal_error)?;

    Ok(Json(metrics))
}

/// GET /api/models
pub async fn get_models(State(state): State<AppState>) -> HandlerResult<Vec<MlModel>> {
    let models = state.store.list_ml_models().await.map_err(internal_error)?;
    Ok(Json(models))
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub uptime_seconds: i64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        uptime_seconds: state.uptime_seconds(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarginModelBits;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn test_state() -> AppState {
        AppState::new(Arc::new(MemoryStore::new()), MarginModelBits::Exclude)
    }

    #[tokio::test]
    async fn matches_endpoint_returns_sorted_season() {
        let state = test_state();

        for (round, home, away) in [(2u32, "Essendon", "Hawthorn"), (1, "Richmond", "Carlton")] {
            state
                .store
                .upsert_match(&Match {
                    season: 2017,
                    round_number: round,
                    venue: "MCG".to_string(),
                    start_date_time: Utc.with_ymd_and_hms(2017, 3, 23, 9, 0, 0).unwrap(),
                    home_team: home.to_string(),
                    away_team: away.to_string(),
                    winner: None,
                    margin: None,
                })
                .await
                .unwrap();
        }

        let Json(matches) = get_matches(
            State(state),
            Query(SeasonQuery { season: Some(2017) }),
        )
        .await
        .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].round_number, 1);
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let Json(status) = health(State(test_state())).await;
        assert_eq!(status.status, "ok");
        assert!(status.uptime_seconds >= 0);
    }
}
