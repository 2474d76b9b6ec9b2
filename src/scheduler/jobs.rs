//! Scheduled job compositions.
//!
//! Jobs are stateless: each invocation opens its own sessions, drives the
//! fetchers/requestor/submitter against storage, and closes the sessions on
//! every exit path. All coordination between overlapping invocations lives in
//! the storage contract.

use chrono::{Datelike, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::{Match, MlModel, PredictionType};
use crate::error::{Result, TiplineError};
use crate::metrics::{MetricsAggregator, RoundMetrics};
use crate::predictions::{HttpPredictionService, PredictionRequestor, TipSubmitter};
use crate::session::{ScrapingSession, SessionCredentials};
use crate::sources::{FixtureFetcher, FixtureSyncReport, ResultFetcher, ResultSyncReport};
use crate::storage::TipStore;
use crate::supervisor::{ErrorReporter, ReportLevel};

/// Shared dependencies for every job.
pub struct JobContext {
    pub store: Arc<dyn TipStore>,
    pub config: AppConfig,
    pub reporter: Option<Arc<ErrorReporter>>,
}

impl JobContext {
    pub fn new(
        store: Arc<dyn TipStore>,
        config: AppConfig,
        reporter: Option<Arc<ErrorReporter>>,
    ) -> Self {
        Self {
            store,
            config,
            reporter,
        }
    }

    fn current_season(&self) -> i32 {
        Utc::now().year()
    }

    /// The round currently being tipped: the round of the earliest stored
    /// match without results. `None` when the season has no open matches.
    async fn current_round(&self, season: i32) -> Result<Option<u32>> {
        let mut open: Vec<Match> = self.store.matches_missing_results(season).await?;
        open.sort_by_key(|m| m.start_date_time);
        Ok(open.first().map(|m| m.round_number))
    }

    async fn open_fixture_session(&self) -> Result<ScrapingSession> {
        let source = &self.config.fixture_source;
        ScrapingSession::open(
            &source.base_url,
            SessionCredentials {
                username: source.username.clone(),
                password: source.password.clone(),
            },
            source.request_timeout_secs,
            source.max_login_attempts,
        )
        .await
    }

    /// Register the configured principal models so the submitter can find
    /// them. Idempotent.
    pub async fn seed_ml_models(&self) -> Result<()> {
        let principals = &self.config.submission.principal_models;

        for (name, prediction_type) in [
            (&principals.margin, PredictionType::Margin),
            (&principals.win_probability, PredictionType::WinProbability),
        ] {
            if let Some(name) = name {
                self.store
                    .upsert_ml_model(&MlModel {
                        name: name.clone(),
                        prediction_type,
                        is_principal: true,
                        used_in_competitions: true,
                    })
                    .await?;
            }
        }

        Ok(())
    }

    /// Sync fixtures, either the whole season or just the round being tipped.
    pub async fn fixture_sync(&self, full_season: bool) -> Result<FixtureSyncReport> {
        let season = self.current_season();
        let rounds = if full_season {
            None
        } else {
            self.current_round(season).await?.map(|round| vec![round])
        };

        let session = self.open_fixture_session().await?;
        let fetcher = FixtureFetcher::new(
            self.store.clone(),
            self.config.schedule.fetch_concurrency,
        );
        let outcome = fetcher.sync(&session, season, rounds.as_deref()).await;
        session.close().await;

        outcome
    }

    /// Backfill results for played matches, refreshing prediction correctness.
    pub async fn result_sync(&self) -> Result<ResultSyncReport> {
        let season = self.current_season();

        let session = self.open_fixture_session().await?;
        let fetcher = ResultFetcher::new(self.store.clone());
        let outcome = fetcher.sync(&session, season, None, Utc::now()).await;
        session.close().await;

        outcome
    }

    /// Request predictions for the round being tipped. An incomplete answer
    /// is reported and left for the next tick to retry.
    pub async fn request_predictions(&self, ml_models: &[String]) -> Result<()> {
        let season = self.current_season();
        let round_number = self.current_round(season).await?;

        let service = Arc::new(HttpPredictionService::new(&self.config.prediction_service)?);
        let requestor = PredictionRequestor::new(self.store.clone(), service);

        match requestor.request(season, round_number, ml_models).await {
            Ok(report) => {
                info!(stored = report.stored, "predictions stored");
                Ok(())
            }
            Err(TiplineError::PartialPrediction { unanswered }) => {
                warn!(
                    unanswered = unanswered.len(),
                    "prediction service answered partially"
                );
                if let Some(reporter) = &self.reporter {
                    reporter
                        .report(
                            ReportLevel::Warning,
                            "predictions",
                            "prediction service answered partially",
                            Some(serde_json::json!({ "unanswered": unanswered.len() })),
                        )
                        .await;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Submit the current round's tips to every configured competition.
    pub async fn submit_tips(&self) -> Result<()> {
        let season = self.current_season();
        let Some(round_number) = self.current_round(season).await? else {
            info!(season, "no open round to tip");
            return Ok(());
        };

        self.seed_ml_models().await?;
        let submitter =
            TipSubmitter::new(self.store.clone(), self.config.submission.max_retries);

        for competition in &self.config.competitions {
            // One unreachable site must not cost the other competitions
            // their tips.
            let session = match ScrapingSession::open(
                &competition.base_url,
                SessionCredentials {
                    username: competition.username.clone(),
                    password: competition.password.clone(),
                },
                self.config.fixture_source.request_timeout_secs,
                self.config.fixture_source.max_login_attempts,
            )
            .await
            {
                Ok(session) => session,
                Err(e) => {
                    warn!(competition = %competition.name, "competition login failed: {e}");
                    if let Some(reporter) = &self.reporter {
                        reporter
                            .report(
                                ReportLevel::Error,
                                "submitter",
                                &format!("could not open a session for {}", competition.name),
                                Some(serde_json::json!({ "error": e.to_string() })),
                            )
                            .await;
                    }
                    continue;
                }
            };

            let outcome = submitter
                .submit_round(&session, competition, season, round_number)
                .await;
            session.close().await;
            let report = outcome?;

            for (match_key, attempts) in &report.retries_exhausted {
                warn!(%match_key, attempts, competition = %competition.name, "tip given up");
                if let Some(reporter) = &self.reporter {
                    reporter
                        .report(
                            ReportLevel::Fatal,
                            "submitter",
                            &format!("submission retries exhausted for {match_key}"),
                            Some(serde_json::json!({
                                "competition": competition.name,
                                "attempts": attempts,
                            })),
                        )
                        .await;
                }
            }
        }

        Ok(())
    }

    /// The daily tipping job: fresh predictions, then official tips.
    pub async fn tip(&self, ml_models: &[String]) -> Result<()> {
        self.request_predictions(ml_models).await?;
        self.submit_tips().await
    }

    /// Recompute the season's cumulative metrics.
    pub async fn season_metrics(&self) -> Result<Vec<RoundMetrics>> {
        let aggregator = MetricsAggregator::new(
            self.store.clone(),
            self.config.metrics.margin_model_bits,
        );
        aggregator.latest_metrics(self.current_season()).await
    }
}
