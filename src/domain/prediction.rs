use serde::{Deserialize, Serialize};

use crate::domain::matches::{Match, MatchKey};
use crate::domain::ml_model::PredictionType;
use crate::error::{Result, TiplineError};

/// One model's prediction for one match.
///
/// Immutable after creation except for the derived `is_correct` flag, which
/// is filled in once the match result is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub match_key: MatchKey,
    pub ml_model: String,
    pub predicted_winner: String,
    /// Set for margin models only; always positive, as it belongs to the
    /// predicted winner.
    pub predicted_margin: Option<f64>,
    /// Set for win-probability models only; probability that the predicted
    /// winner wins.
    pub predicted_win_probability: Option<f64>,
    pub is_correct: Option<bool>,
}

impl Prediction {
    /// Build a margin prediction. Fractional margins below 0.5 are kept at a
    /// minimum of 1: a zero margin would amount to predicting a draw, which
    /// no margin model does.
    pub fn margin(match_key: MatchKey, ml_model: &str, winner: &str, margin: f64) -> Result<Self> {
        if margin < 0.0 {
            return Err(TiplineError::Validation(format!(
                "predicted margin must be non-negative, got {margin}"
            )));
        }

        Ok(Self {
            match_key,
            ml_model: ml_model.to_string(),
            predicted_winner: winner.to_string(),
            predicted_margin: Some(margin.round().max(1.0)),
            predicted_win_probability: None,
            is_correct: None,
        })
    }

    /// Build a win-probability prediction.
    pub fn win_probability(
        match_key: MatchKey,
        ml_model: &str,
        winner: &str,
        probability: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(TiplineError::Validation(format!(
                "predicted win probability must be in [0, 1], got {probability}"
            )));
        }

        Ok(Self {
            match_key,
            ml_model: ml_model.to_string(),
            predicted_winner: winner.to_string(),
            predicted_margin: None,
            predicted_win_probability: Some(probability),
            is_correct: None,
        })
    }

    pub fn prediction_type(&self) -> PredictionType {
        if self.predicted_margin.is_some() {
            PredictionType::Margin
        } else {
            PredictionType::WinProbability
        }
    }

    /// Derive correctness from a finalized match, by conventional tipping
    /// rules: everyone gets a correct tip for a draw.
    pub fn calculate_whether_correct(&self, m: &Match) -> Option<bool> {
        if !m.has_results() {
            return None;
        }

        Some(m.is_draw() || m.winner.as_deref() == Some(self.predicted_winner.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn key() -> MatchKey {
        MatchKey {
            season: 2017,
            round_number: 1,
            home_team: "Richmond".to_string(),
            away_team: "Carlton".to_string(),
        }
    }

    fn played_match(winner: Option<&str>, margin: u32) -> Match {
        Match {
            season: 2017,
            round_number: 1,
            venue: "MCG".to_string(),
            start_date_time: Utc.with_ymd_and_hms(2017, 3, 23, 9, 0, 0).unwrap(),
            home_team: "Richmond".to_string(),
            away_team: "Carlton".to_string(),
            winner: winner.map(|w| w.to_string()),
            margin: Some(margin),
        }
    }

    #[test]
    fn fractional_margin_rounds_to_at_least_one() {
        let p = Prediction::margin(key(), "line_model", "Richmond", 0.3).unwrap();
        assert_eq!(p.predicted_margin, Some(1.0));

        let p = Prediction::margin(key(), "line_model", "Richmond", 12.4).unwrap();
        assert_eq!(p.predicted_margin, Some(12.0));
    }

    #[test]
    fn probability_bounds_enforced() {
        assert!(Prediction::win_probability(key(), "prob_model", "Richmond", 1.2).is_err());
        assert!(Prediction::win_probability(key(), "prob_model", "Richmond", 0.8).is_ok());
    }

    #[test]
    fn correctness_follows_winner() {
        let p = Prediction::margin(key(), "line_model", "Richmond", 12.0).unwrap();

        assert_eq!(
            p.calculate_whether_correct(&played_match(Some("Richmond"), 10)),
            Some(true)
        );
        assert_eq!(
            p.calculate_whether_correct(&played_match(Some("Carlton"), 10)),
            Some(false)
        );
    }

    #[test]
    fn draw_counts_as_correct_for_everyone() {
        let p = Prediction::margin(key(), "line_model", "Carlton", 5.0).unwrap();
        assert_eq!(p.calculate_whether_correct(&played_match(None, 0)), Some(true));
    }

    #[test]
    fn unplayed_match_yields_no_correctness() {
        let p = Prediction::margin(key(), "line_model", "Richmond", 5.0).unwrap();
        let mut m = played_match(Some("Richmond"), 10);
        m.winner = None;
        m.margin = None;
        assert_eq!(p.calculate_whether_correct(&m), None);
    }
}
