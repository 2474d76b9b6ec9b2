//! Prediction requestor.
//!
//! Talks to the external prediction service (JSON over HTTP) for matches
//! that lack a prediction from each requested model. The service answers in
//! per-team rows; home/away pairs are pivoted into one prediction per match
//! per model before persisting. Predictions are create-only.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PredictionServiceConfig;
use crate::domain::{normalize_team_name, MatchKey, Prediction};
use crate::error::{Result, TiplineError};
use crate::storage::TipStore;

/// One per-team row as the service returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct ServicePredictionRow {
    pub year: i32,
    pub round_number: u32,
    pub team: String,
    pub oppo_team: String,
    pub at_home: bool,
    pub ml_model: String,
    pub predicted_margin: Option<f64>,
    pub predicted_win_probability: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    data: Vec<ServicePredictionRow>,
}

/// Seam over the prediction service wire call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn fetch_predictions(
        &self,
        year_range: &str,
        round_number: Option<u32>,
        ml_models: &[String],
    ) -> Result<Vec<ServicePredictionRow>>;
}

/// reqwest-backed service client with bearer-token auth.
pub struct HttpPredictionService {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPredictionService {
    pub fn new(config: &PredictionServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl PredictionService for HttpPredictionService {
    async fn fetch_predictions(
        &self,
        year_range: &str,
        round_number: Option<u32>,
        ml_models: &[String],
    ) -> Result<Vec<ServicePredictionRow>> {
        let mut query: Vec<(&str, String)> = vec![
            ("year_range", year_range.to_string()),
            ("ml_models", ml_models.join(",")),
        ];
        if let Some(round) = round_number {
            query.push(("round_number", round.to_string()));
        }

        let mut request = self
            .client
            .get(format!("{}/predictions", self.base_url))
            .query(&query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let body: PredictionResponse = response.json().await?;

        debug!(rows = body.data.len(), "prediction service responded");
        Ok(body.data)
    }
}

/// What one request pass did. Unanswered pairs are reported through
/// `TiplineError::PartialPrediction`, not here.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PredictionRequestReport {
    pub pairs_requested: usize,
    pub stored: usize,
    pub duplicates: usize,
}

pub struct PredictionRequestor {
    store: Arc<dyn TipStore>,
    service: Arc<dyn PredictionService>,
}

impl PredictionRequestor {
    pub fn new(store: Arc<dyn TipStore>, service: Arc<dyn PredictionService>) -> Self {
        Self { store, service }
    }

    /// Request predictions for every (match, model) pair in the season (and
    /// optional round) that doesn't have one yet.
    ///
    /// Answered pairs are persisted even when the response is incomplete; the
    /// remaining gap comes back as `PartialPrediction` so the caller can
    /// retry just those pairs.
    pub async fn request(
        &self,
        season: i32,
        round_number: Option<u32>,
        ml_models: &[String],
    ) -> Result<PredictionRequestReport> {
        let matches: Vec<_> = self
            .store
            .matches_for_season(season)
            .await?
            .into_iter()
            .filter(|m| round_number.map_or(true, |round| m.round_number == round))
            .collect();

        let mut missing: Vec<(MatchKey, String)> = Vec::new();
        for m in &matches {
            let existing = self.store.predictions_for_match(&m.key()).await?;
            for model in ml_models {
                if !existing.iter().any(|p| p.ml_model == *model) {
                    missing.push((m.key(), model.clone()));
                }
            }
        }

        let mut report = PredictionRequestReport {
            pairs_requested: missing.len(),
            ..Default::default()
        };
        if missing.is_empty() {
            return Ok(report);
        }

        let year_range = format!("{season}-{}", season + 1);
        let rows = self
            .service
            .fetch_predictions(&year_range, round_number, ml_models)
            .await?;
        let pivoted = pivot_rows(rows);

        let mut unanswered = Vec::new();

        for (key, model) in missing {
            let Some(prediction) = pivoted.get(&(key.clone(), model.clone())) else {
                unanswered.push((key, model));
                continue;
            };

            match self.store.create_prediction(prediction).await {
                Ok(()) => report.stored += 1,
                // Another invocation got there first; stored rows never change.
                Err(TiplineError::DuplicatePrediction { .. }) => report.duplicates += 1,
                Err(e) => return Err(e),
            }
        }

        info!(
            season,
            stored = report.stored,
            unanswered = unanswered.len(),
            "prediction request complete"
        );

        if unanswered.is_empty() {
            Ok(report)
        } else {
            Err(TiplineError::PartialPrediction { unanswered })
        }
    }
}

/// Pivot per-team service rows into one prediction per (match, model).
///
/// The winner is the team with the larger predicted value for the model's
/// kind; equal values are malformed and the pair is dropped (it surfaces as
/// unanswered).
fn pivot_rows(rows: Vec<ServicePredictionRow>) -> HashMap<(MatchKey, String), Prediction> {
    let mut grouped: HashMap<(MatchKey, String), Vec<ServicePredictionRow>> = HashMap::new();

    for row in rows {
        let Some(team) = normalize_team_name(&row.team) else {
            warn!(team = %row.team, "dropping prediction row with unknown team");
            continue;
        };
        let Some(oppo) = normalize_team_name(&row.oppo_team) else {
            warn!(team = %row.oppo_team, "dropping prediction row with unknown team");
            continue;
        };

        let (home_team, away_team) = if row.at_home {
            (team, oppo)
        } else {
            (oppo, team)
        };
        let key = MatchKey {
            season: row.year,
            round_number: row.round_number,
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
        };

        grouped.entry((key, row.ml_model.clone())).or_default().push(row);
    }

    let mut pivoted = HashMap::new();

    for ((key, model), pair) in grouped {
        match build_prediction(&key, &model, &pair) {
            Ok(prediction) => {
                pivoted.insert((key, model), prediction);
            }
            Err(e) => warn!(match_key = %key, model = %model, "dropping malformed pair: {e}"),
        }
    }

    pivoted
}

fn build_prediction(
    key: &MatchKey,
    model: &str,
    pair: &[ServicePredictionRow],
) -> Result<Prediction> {
    let [a, b] = pair else {
        return Err(TiplineError::Ingestion(format!(
            "expected a home/away row pair, got {} rows",
            pair.len()
        )));
    };

    if a.at_home == b.at_home {
        return Err(TiplineError::Ingestion(
            "pair is missing one side of the match".to_string(),
        ));
    }

    let winner_of = |va: f64, vb: f64| -> Result<&ServicePredictionRow> {
        if va == vb {
            return Err(TiplineError::Ingestion(
                "equal predicted values for both teams".to_string(),
            ));
        }
        Ok(if va > vb { a } else { b })
    };

    match (a.predicted_margin, b.predicted_margin) {
        (Some(ma), Some(mb)) => {
            let winner = winner_of(ma, mb)?;
            let winner_team = normalize_team_name(&winner.team)
                .ok_or_else(|| TiplineError::Ingestion(format!("unknown team {:?}", winner.team)))?;
            // Checked Some above.
            let margin = winner.predicted_margin.unwrap_or_default();
            Prediction::margin(key.clone(), model, winner_team, margin)
        }
        _ => match (a.predicted_win_probability, b.predicted_win_probability) {
            (Some(pa), Some(pb)) => {
                let winner = winner_of(pa, pb)?;
                let winner_team = normalize_team_name(&winner.team).ok_or_else(|| {
                    TiplineError::Ingestion(format!("unknown team {:?}", winner.team))
                })?;
                let probability = winner.predicted_win_probability.unwrap_or_default();
                Prediction::win_probability(key.clone(), model, winner_team, probability)
            }
            _ => Err(TiplineError::Ingestion(
                "rows carry neither a margin pair nor a probability pair".to_string(),
            )),
        },
    }
}
