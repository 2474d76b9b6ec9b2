//! Official tip submission.
//!
//! One competition site at a time: pick the principal model for the site's
//! prediction kind, translate team names into the site's display vocabulary,
//! and post one tip form per match. The `SUBMITTING` state is entered through
//! the storage compare-and-set guard, so overlapping invocations cannot
//! double-submit.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::CompetitionConfig;
use crate::domain::{display_name_for_site, MatchKey, MlModel, Prediction};
use crate::error::{Result, TiplineError};
use crate::session::ScrapingSession;
use crate::storage::TipStore;

// Competition sites answer tip posts with an HTML page; this marker is how
// they flag a rejected form.
const SUBMISSION_REJECTION_MARKER: &str = "tipping-error";

/// What one submission pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    pub submitted: usize,
    /// Pairs skipped because another attempt is in flight or already done.
    pub skipped: usize,
    pub failed: usize,
    /// Pairs that hit the retry cap; surfaced so the caller can report them.
    pub retries_exhausted: Vec<(MatchKey, u32)>,
}

pub struct TipSubmitter {
    store: Arc<dyn TipStore>,
    max_retries: u32,
}

impl TipSubmitter {
    pub fn new(store: Arc<dyn TipStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// The principal model whose tips go to this competition.
    async fn principal_model_for(&self, competition: &CompetitionConfig) -> Result<MlModel> {
        self.store
            .list_ml_models()
            .await?
            .into_iter()
            .find(|m| {
                m.is_principal
                    && m.used_in_competitions
                    && m.prediction_type == competition.prediction_type
            })
            .ok_or_else(|| {
                TiplineError::Validation(format!(
                    "no principal {} model registered for competition {}",
                    competition.prediction_type, competition.name
                ))
            })
    }

    /// Submit tips for one round of one competition. Per-match failures are
    /// isolated; the report says what happened to each pair.
    pub async fn submit_round(
        &self,
        session: &ScrapingSession,
        competition: &CompetitionConfig,
        season: i32,
        round_number: u32,
    ) -> Result<SubmissionReport> {
        let model = self.principal_model_for(competition).await?;

        let matches: Vec<_> = self
            .store
            .matches_for_season(season)
            .await?
            .into_iter()
            .filter(|m| m.round_number == round_number)
            .collect();

        let mut report = SubmissionReport::default();

        for m in matches {
            let key = m.key();
            let prediction = self
                .store
                .predictions_for_match(&key)
                .await?
                .into_iter()
                .find(|p| p.ml_model == model.name);

            let Some(prediction) = prediction else {
                warn!(match_key = %key, model = %model.name, "no prediction to submit");
                continue;
            };

            match self
                .store
                .begin_submission(&key, &model.name, &competition.name, self.max_retries)
                .await
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(TiplineError::SubmissionRetriesExhausted { match_key, attempts }) => {
                    report.retries_exhausted.push((match_key, attempts));
                    continue;
                }
                Err(e) => return Err(e),
            }

            match self.post_tip(session, competition, &prediction).await {
                Ok(()) => {
                    self.store
                        .complete_submission(&key, &model.name, &competition.name)
                        .await?;
                    report.submitted += 1;
                }
                Err(e) => {
                    warn!(match_key = %key, competition = %competition.name, "tip failed: {e}");
                    self.store
                        .fail_submission(&key, &model.name, &competition.name)
                        .await?;
                    report.failed += 1;
                }
            }
        }

        info!(
            competition = %competition.name,
            season,
            round_number,
            submitted = report.submitted,
            skipped = report.skipped,
            failed = report.failed,
            "tip submission complete"
        );
        Ok(report)
    }

    async fn post_tip(
        &self,
        session: &ScrapingSession,
        competition: &CompetitionConfig,
        prediction: &Prediction,
    ) -> Result<()> {
        let key = &prediction.match_key;
        let round = key.round_number.to_string();
        let home = display_name_for_site(&key.home_team);
        let away = display_name_for_site(&key.away_team);
        let tip = display_name_for_site(&prediction.predicted_winner);
        let value = tip_value(prediction);

        let fields = [
            ("round", round.as_str()),
            ("home", home),
            ("away", away),
            ("tip", tip),
            ("value", value.as_str()),
        ];

        let body = session.submit_form("tips", &fields).await?;
        if body.contains(SUBMISSION_REJECTION_MARKER) {
            return Err(TiplineError::Submission(format!(
                "{} rejected tip for {key}",
                competition.name
            )));
        }

        Ok(())
    }
}

/// The site-facing tip value: whole-point margins for margin competitions,
/// probabilities for probability competitions.
fn tip_value(prediction: &Prediction) -> String {
    if let Some(margin) = prediction.predicted_margin {
        format!("{}", margin.round() as i64)
    } else {
        format!(
            "{:.3}",
            prediction.predicted_win_probability.unwrap_or(0.5)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Match, PredictionType, SubmissionStatus};
    use crate::session::{SessionCredentials, SessionTransport};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    struct RecordingSite {
        posted: Arc<Mutex<Vec<String>>>,
        reject: bool,
    }

    #[async_trait]
    impl SessionTransport for RecordingSite {
        async fn get(&self, _url: &str) -> Result<String> {
            Ok("<html></html>".to_string())
        }

        async fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<String> {
            if url.ends_with("/tips") {
                let tip = fields
                    .iter()
                    .find(|(name, _)| *name == "tip")
                    .map(|(_, value)| value.to_string())
                    .unwrap_or_default();
                self.posted.lock().unwrap().push(tip);

                if self.reject {
                    return Ok("<div class=\"tipping-error\">bad tip</div>".to_string());
                }
            }
            Ok("saved".to_string())
        }
    }

    async fn session_for(site: RecordingSite) -> ScrapingSession {
        ScrapingSession::open_with_transport(
            Box::new(site),
            "https://comp.example.com",
            SessionCredentials {
                username: "tipper".to_string(),
                password: "secret".to_string(),
            },
            1,
        )
        .await
        .unwrap()
    }

    fn competition() -> CompetitionConfig {
        CompetitionConfig {
            name: "monash_normal".to_string(),
            prediction_type: PredictionType::Margin,
            base_url: "https://comp.example.com".to_string(),
            username: "tipper".to_string(),
            password: "secret".to_string(),
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());

        store
            .upsert_ml_model(&MlModel {
                name: "line_model".to_string(),
                prediction_type: PredictionType::Margin,
                is_principal: true,
                used_in_competitions: true,
            })
            .await
            .unwrap();

        let m = Match {
            season: 2017,
            round_number: 1,
            venue: "MCG".to_string(),
            start_date_time: Utc.with_ymd_and_hms(2017, 3, 23, 9, 0, 0).unwrap(),
            home_team: "GWS".to_string(),
            away_team: "Carlton".to_string(),
            winner: None,
            margin: None,
        };
        store.upsert_match(&m).await.unwrap();

        let prediction = Prediction::margin(m.key(), "line_model", "GWS", 11.6).unwrap();
        store.create_prediction(&prediction).await.unwrap();

        store
    }

    #[tokio::test]
    async fn submits_with_site_display_names() {
        let store = seeded_store().await;
        let posted = Arc::new(Mutex::new(vec![]));
        let site = RecordingSite {
            posted: posted.clone(),
            reject: false,
        };
        let session = session_for(site).await;

        let submitter = TipSubmitter::new(store.clone(), 3);
        let report = submitter
            .submit_round(&session, &competition(), 2017, 1)
            .await
            .unwrap();
        assert_eq!(report.submitted, 1);

        // Canonical "GWS" goes out in the site's vocabulary.
        assert_eq!(posted.lock().unwrap().as_slice(), ["GWS Giants"]);

        let key = MatchKey {
            season: 2017,
            round_number: 1,
            home_team: "GWS".to_string(),
            away_team: "Carlton".to_string(),
        };
        let submission = store
            .get_submission(&key, "line_model", "monash_normal")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.status, SubmissionStatus::Submitted);
    }

    #[tokio::test]
    async fn rejected_tip_marks_submission_failed() {
        let store = seeded_store().await;
        let site = RecordingSite {
            posted: Arc::new(Mutex::new(vec![])),
            reject: true,
        };
        let session = session_for(site).await;

        let submitter = TipSubmitter::new(store.clone(), 3);
        let report = submitter
            .submit_round(&session, &competition(), 2017, 1)
            .await
            .unwrap();
        assert_eq!(report.failed, 1);

        let key = MatchKey {
            season: 2017,
            round_number: 1,
            home_team: "GWS".to_string(),
            away_team: "Carlton".to_string(),
        };
        let submission = store
            .get_submission(&key, "line_model", "monash_normal")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.status, SubmissionStatus::Failed);
        assert_eq!(submission.attempts, 1);
    }

    // The site signals an expired session by answering a tip post with its
    // login form instead of an error status.
    struct ExpiredSessionSite;

    #[async_trait]
    impl SessionTransport for ExpiredSessionSite {
        async fn get(&self, _url: &str) -> Result<String> {
            Ok("<html></html>".to_string())
        }

        async fn post_form(&self, url: &str, _fields: &[(&str, &str)]) -> Result<String> {
            if url.ends_with("/tips") {
                Ok("<form id=\"signin\"><input name=\"passwd\"></form>".to_string())
            } else {
                Ok("welcome".to_string())
            }
        }
    }

    #[tokio::test]
    async fn tip_bounced_to_login_page_is_not_marked_submitted() {
        let store = seeded_store().await;
        let session = ScrapingSession::open_with_transport(
            Box::new(ExpiredSessionSite),
            "https://comp.example.com",
            SessionCredentials {
                username: "tipper".to_string(),
                password: "secret".to_string(),
            },
            1,
        )
        .await
        .unwrap();

        let submitter = TipSubmitter::new(store.clone(), 3);
        let report = submitter
            .submit_round(&session, &competition(), 2017, 1)
            .await
            .unwrap();
        assert_eq!(report.submitted, 0);
        assert_eq!(report.failed, 1);

        let key = MatchKey {
            season: 2017,
            round_number: 1,
            home_team: "GWS".to_string(),
            away_team: "Carlton".to_string(),
        };
        let submission = store
            .get_submission(&key, "line_model", "monash_normal")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.status, SubmissionStatus::Failed);
        assert_eq!(submission.attempts, 1);
    }
}
