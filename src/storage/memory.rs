//! In-memory store for tests, dry runs and single-invocation CLI use.
//!
//! Production deployments plug an external persistence adapter into
//! [`TipStore`]; this implementation exists so the pipeline's semantics
//! (idempotent upserts, set-once results, create-only predictions, the
//! submission CAS) can run and be verified without one.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::{
    Match, MatchKey, MatchResult, MlModel, Prediction, Submission, SubmissionStatus, TeamMatch,
};
use crate::error::{Result, TiplineError};
use crate::storage::TipStore;

#[derive(Default)]
struct Inner {
    matches: HashMap<MatchKey, Match>,
    team_matches: HashMap<(MatchKey, String), TeamMatch>,
    predictions: HashMap<(MatchKey, String), Prediction>,
    ml_models: HashMap<String, MlModel>,
    submissions: HashMap<(MatchKey, String, String), Submission>,
}

/// Mutex-backed [`TipStore`]; the single lock makes every operation atomic,
/// which is what gives `begin_submission` its CAS semantics.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TipStore for MemoryStore {
    async fn upsert_match(&self, m: &Match) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = m.key();

        match inner.matches.get_mut(&key) {
            Some(existing) => {
                // Fixture re-syncs may move a match or its kickoff time, but
                // never its result.
                existing.venue = m.venue.clone();
                existing.start_date_time = m.start_date_time;
            }
            None => {
                let mut row = m.clone();
                row.winner = None;
                row.margin = None;
                inner.matches.insert(key, row);
            }
        }

        Ok(())
    }

    async fn upsert_team_match(&self, tm: &TeamMatch) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = (tm.match_key.clone(), tm.team.clone());

        match inner.team_matches.get_mut(&key) {
            Some(existing) => {
                existing.at_home = tm.at_home;
            }
            None => {
                inner.team_matches.insert(key, tm.clone());
            }
        }

        Ok(())
    }

    async fn get_match(&self, key: &MatchKey) -> Result<Option<Match>> {
        let inner = self.inner.lock().await;
        Ok(inner.matches.get(key).cloned())
    }

    async fn matches_for_season(&self, season: i32) -> Result<Vec<Match>> {
        let inner = self.inner.lock().await;
        let mut matches: Vec<Match> = inner
            .matches
            .values()
            .filter(|m| m.season == season)
            .cloned()
            .collect();
        matches.sort_by_key(|m| (m.round_number, m.start_date_time));
        Ok(matches)
    }

    async fn matches_missing_results(&self, season: i32) -> Result<Vec<Match>> {
        let inner = self.inner.lock().await;
        let mut matches: Vec<Match> = inner
            .matches
            .values()
            .filter(|m| m.season == season && !m.has_results())
            .cloned()
            .collect();
        matches.sort_by_key(|m| (m.round_number, m.start_date_time));
        Ok(matches)
    }

    async fn team_matches_for(&self, key: &MatchKey) -> Result<Vec<TeamMatch>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<TeamMatch> = inner
            .team_matches
            .values()
            .filter(|tm| &tm.match_key == key)
            .cloned()
            .collect();
        rows.sort_by_key(|tm| !tm.at_home);
        Ok(rows)
    }

    async fn set_match_result(&self, key: &MatchKey, result: &MatchResult) -> Result<()> {
        let mut inner = self.inner.lock().await;

        {
            let m = inner
                .matches
                .get_mut(key)
                .ok_or_else(|| TiplineError::NotFound(format!("match {key}")))?;

            if m.has_results() {
                // Identical re-fetch is a no-op; anything else halts this row.
                if m.winner == result.winner && m.margin == Some(result.margin) {
                    return Ok(());
                }

                return Err(TiplineError::DataIntegrity(format!(
                    "match {key} already has result {:?} by {}, refusing {:?} by {}",
                    m.winner,
                    m.margin.unwrap_or(0),
                    result.winner,
                    result.margin
                )));
            }

            m.winner = result.winner.clone();
            m.margin = Some(result.margin);
        }

        let (home_team, away_team) = (key.home_team.clone(), key.away_team.clone());

        if let Some(tm) = inner.team_matches.get_mut(&(key.clone(), home_team)) {
            tm.score = Some(result.home_score);
        }
        if let Some(tm) = inner.team_matches.get_mut(&(key.clone(), away_team)) {
            tm.score = Some(result.away_score);
        }

        Ok(())
    }

    async fn create_prediction(&self, prediction: &Prediction) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = (prediction.match_key.clone(), prediction.ml_model.clone());

        if inner.predictions.contains_key(&key) {
            return Err(TiplineError::DuplicatePrediction {
                match_key: prediction.match_key.clone(),
                ml_model: prediction.ml_model.clone(),
            });
        }

        inner.predictions.insert(key, prediction.clone());
        Ok(())
    }

    async fn update_prediction_correctness(
        &self,
        key: &MatchKey,
        ml_model: &str,
        is_correct: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let prediction = inner
            .predictions
            .get_mut(&(key.clone(), ml_model.to_string()))
            .ok_or_else(|| TiplineError::NotFound(format!("prediction {key} by {ml_model}")))?;

        prediction.is_correct = Some(is_correct);
        Ok(())
    }

    async fn predictions_for_match(&self, key: &MatchKey) -> Result<Vec<Prediction>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Prediction> = inner
            .predictions
            .values()
            .filter(|p| &p.match_key == key)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.ml_model.cmp(&b.ml_model));
        Ok(rows)
    }

    async fn predictions_for_season(&self, season: i32) -> Result<Vec<Prediction>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Prediction> = inner
            .predictions
            .values()
            .filter(|p| p.match_key.season == season)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.match_key.round_number, &a.match_key.home_team, &a.ml_model).cmp(&(
                b.match_key.round_number,
                &b.match_key.home_team,
                &b.ml_model,
            ))
        });
        Ok(rows)
    }

    async fn upsert_ml_model(&self, model: &MlModel) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if model.is_principal {
            let conflicting = inner.ml_models.values().any(|existing| {
                existing.name != model.name
                    && existing.is_principal
                    && existing.prediction_type == model.prediction_type
            });

            if conflicting {
                return Err(TiplineError::Validation(format!(
                    "duplicate principal {} models not allowed",
                    model.prediction_type
                )));
            }
        }

        inner.ml_models.insert(model.name.clone(), model.clone());
        Ok(())
    }

    async fn list_ml_models(&self) -> Result<Vec<MlModel>> {
        let inner = self.inner.lock().await;
        let mut models: Vec<MlModel> = inner.ml_models.values().cloned().collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    async fn get_submission(
        &self,
        key: &MatchKey,
        ml_model: &str,
        competition: &str,
    ) -> Result<Option<Submission>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .submissions
            .get(&(key.clone(), ml_model.to_string(), competition.to_string()))
            .cloned())
    }

    async fn begin_submission(
        &self,
        key: &MatchKey,
        ml_model: &str,
        competition: &str,
        max_retries: u32,
    ) -> Result<Option<Submission>> {
        let mut inner = self.inner.lock().await;

        let submission = inner
            .submissions
            .entry((key.clone(), ml_model.to_string(), competition.to_string()))
            .or_insert_with(|| Submission::new(key.clone(), ml_model, competition));

        if !submission.status.can_begin_attempt() {
            return Ok(None);
        }

        if submission.attempts >= max_retries {
            return Err(TiplineError::SubmissionRetriesExhausted {
                match_key: key.clone(),
                attempts: submission.attempts,
            });
        }

        submission.transition(SubmissionStatus::Submitting)?;
        Ok(Some(submission.clone()))
    }

    async fn complete_submission(
        &self,
        key: &MatchKey,
        ml_model: &str,
        competition: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let submission = inner
            .submissions
            .get_mut(&(key.clone(), ml_model.to_string(), competition.to_string()))
            .ok_or_else(|| TiplineError::NotFound(format!("submission {key} by {ml_model}")))?;

        submission.transition(SubmissionStatus::Submitted)
    }

    async fn fail_submission(
        &self,
        key: &MatchKey,
        ml_model: &str,
        competition: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let submission = inner
            .submissions
            .get_mut(&(key.clone(), ml_model.to_string(), competition.to_string()))
            .ok_or_else(|| TiplineError::NotFound(format!("submission {key} by {ml_model}")))?;

        submission.transition(SubmissionStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fixture_match() -> Match {
        Match {
            season: 2017,
            round_number: 1,
            venue: "MCG".to_string(),
            start_date_time: Utc.with_ymd_and_hms(2017, 3, 23, 9, 0, 0).unwrap(),
            home_team: "Richmond".to_string(),
            away_team: "Carlton".to_string(),
            winner: None,
            margin: None,
        }
    }

    #[tokio::test]
    async fn upsert_match_never_touches_results() {
        let store = MemoryStore::new();
        let m = fixture_match();
        let key = m.key();

        store.upsert_match(&m).await.unwrap();
        store
            .set_match_result(&key, &MatchResult::from_scores("Richmond", "Carlton", 100, 80))
            .await
            .unwrap();

        // A fixture resync carrying stale null results must not clear them.
        store.upsert_match(&m).await.unwrap();
        let stored = store.get_match(&key).await.unwrap().unwrap();
        assert_eq!(stored.margin, Some(20));
        assert_eq!(stored.winner.as_deref(), Some("Richmond"));
    }

    #[tokio::test]
    async fn set_match_result_is_set_once() {
        let store = MemoryStore::new();
        let m = fixture_match();
        let key = m.key();
        store.upsert_match(&m).await.unwrap();

        let result = MatchResult::from_scores("Richmond", "Carlton", 100, 80);
        store.set_match_result(&key, &result).await.unwrap();
        // Identical re-fetch is a no-op.
        store.set_match_result(&key, &result).await.unwrap();

        let conflicting = MatchResult::from_scores("Richmond", "Carlton", 80, 100);
        let err = store.set_match_result(&key, &conflicting).await.unwrap_err();
        assert!(matches!(err, TiplineError::DataIntegrity(_)));

        let stored = store.get_match(&key).await.unwrap().unwrap();
        assert_eq!(stored.winner.as_deref(), Some("Richmond"));
    }

    #[tokio::test]
    async fn predictions_are_create_only() {
        let store = MemoryStore::new();
        let m = fixture_match();
        store.upsert_match(&m).await.unwrap();

        let p = Prediction::margin(m.key(), "line_model", "Richmond", 12.0).unwrap();
        store.create_prediction(&p).await.unwrap();

        let resent = Prediction::margin(m.key(), "line_model", "Carlton", 3.0).unwrap();
        let err = store.create_prediction(&resent).await.unwrap_err();
        assert!(matches!(err, TiplineError::DuplicatePrediction { .. }));

        // The original row is untouched.
        let stored = store.predictions_for_match(&m.key()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].predicted_winner, "Richmond");
    }

    #[tokio::test]
    async fn begin_submission_blocks_overlap_and_caps_retries() {
        let store = MemoryStore::new();
        let key = fixture_match().key();

        let first = store
            .begin_submission(&key, "line_model", "monash_normal", 2)
            .await
            .unwrap();
        assert!(first.is_some());

        // Second overlapping attempt is refused while the first is in flight.
        let overlap = store
            .begin_submission(&key, "line_model", "monash_normal", 2)
            .await
            .unwrap();
        assert!(overlap.is_none());

        store
            .fail_submission(&key, "line_model", "monash_normal")
            .await
            .unwrap();

        // Retry allowed once, then the cap trips.
        assert!(store
            .begin_submission(&key, "line_model", "monash_normal", 2)
            .await
            .unwrap()
            .is_some());
        store
            .fail_submission(&key, "line_model", "monash_normal")
            .await
            .unwrap();

        let err = store
            .begin_submission(&key, "line_model", "monash_normal", 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TiplineError::SubmissionRetriesExhausted { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn one_principal_model_per_prediction_type() {
        let store = MemoryStore::new();
        let principal = MlModel {
            name: "line_model".to_string(),
            prediction_type: crate::domain::PredictionType::Margin,
            is_principal: true,
            used_in_competitions: true,
        };
        store.upsert_ml_model(&principal).await.unwrap();

        let rival = MlModel {
            name: "other_line".to_string(),
            ..principal.clone()
        };
        assert!(store.upsert_ml_model(&rival).await.is_err());

        // A principal of the other type is fine.
        let prob = MlModel {
            name: "prob_model".to_string(),
            prediction_type: crate::domain::PredictionType::WinProbability,
            is_principal: true,
            used_in_competitions: true,
        };
        store.upsert_ml_model(&prob).await.unwrap();
    }
}
