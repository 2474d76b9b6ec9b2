//! Cumulative per-season performance metrics.
//!
//! Tips are consumed in round order (ties broken by match start time) and
//! folded into per-model running totals; a `RoundMetrics` snapshot can be
//! taken after any round. Folding is associative over the tip order, so
//! incremental totals after round N always equal a from-scratch recomputation
//! over rounds 1..=N.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::MarginModelBits;
use crate::domain::{Match, Prediction, PredictionType};
use crate::error::Result;
use crate::storage::TipStore;

// Floor for log2 arguments, matching the Monash bits definition.
const MIN_LOG_VAL: f64 = 1e-10;

// A missing probability is treated as a fence-sitting tip.
const NEUTRAL_PROBABILITY: f64 = 0.5;

/// Per-model running totals over scored tips.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningTotals {
    pub tips_seen: u64,
    pub correct: u64,
    /// Margin tips only; drives MAE and margin difference.
    pub margin_tips_seen: u64,
    pub margin_error_sum: f64,
    /// Probability tips only.
    pub probability_tips_seen: u64,
    pub bits_sum: f64,
}

impl RunningTotals {
    fn fold(&mut self, m: &Match, prediction: &Prediction, policy: MarginModelBits) {
        let correct = prediction
            .is_correct
            .or_else(|| prediction.calculate_whether_correct(m))
            .unwrap_or(false);

        self.tips_seen += 1;
        if correct {
            self.correct += 1;
        }

        match prediction.prediction_type() {
            PredictionType::Margin => {
                let predicted = prediction.predicted_margin.unwrap_or_default();
                let actual = f64::from(m.margin.unwrap_or_default());

                self.margin_tips_seen += 1;
                self.margin_error_sum += margin_difference(predicted, actual, correct);

                if policy == MarginModelBits::Zero {
                    self.probability_tips_seen += 1;
                }
            }
            PredictionType::WinProbability => {
                let probability = prediction
                    .predicted_win_probability
                    .unwrap_or(NEUTRAL_PROBABILITY);

                self.probability_tips_seen += 1;
                self.bits_sum += bits(probability, correct, m.is_draw());
            }
        }
    }
}

/// Monash margin difference for one tip: distance to the actual margin when
/// the tipped side won, the two margins added when it didn't (the prediction
/// and the result point in opposite directions).
fn margin_difference(predicted: f64, actual: f64, correct: bool) -> f64 {
    if correct {
        (predicted - actual).abs()
    } else {
        predicted + actual
    }
}

/// Monash bits for one tip at confidence `probability`.
fn bits(probability: f64, correct: bool, draw: bool) -> f64 {
    let p = probability;

    if draw {
        1.0 + 0.5 * (p * (1.0 - p)).max(MIN_LOG_VAL).log2()
    } else if correct {
        1.0 + p.max(MIN_LOG_VAL).log2()
    } else {
        1.0 + (1.0 - p).max(MIN_LOG_VAL).log2()
    }
}

/// Cumulative metrics for one model as of the end of one round.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RoundMetrics {
    pub season: i32,
    pub round_number: u32,
    pub ml_model: String,
    pub cumulative_correct_count: u64,
    /// Correct / seen, in [0, 1].
    pub cumulative_accuracy: f64,
    /// Mean margin difference over margin tips, rounded to 2 decimal places.
    /// `None` until the model has scored a margin tip.
    pub cumulative_mean_absolute_error: Option<f64>,
    pub cumulative_margin_difference: f64,
    /// `None` for margin models under the `exclude` bits policy.
    pub cumulative_bits: Option<f64>,
}

/// Incremental accumulator for one season.
///
/// Feed scored tips in round order (ties by match start time); snapshot after
/// any round boundary.
pub struct SeasonAccumulator {
    policy: MarginModelBits,
    totals: BTreeMap<String, RunningTotals>,
}

impl SeasonAccumulator {
    pub fn new(policy: MarginModelBits) -> Self {
        Self {
            policy,
            totals: BTreeMap::new(),
        }
    }

    /// Fold one scored tip into its model's totals. Tips on matches without
    /// results are ignored.
    pub fn apply(&mut self, m: &Match, prediction: &Prediction) {
        if !m.has_results() {
            return;
        }

        self.totals
            .entry(prediction.ml_model.clone())
            .or_default()
            .fold(m, prediction, self.policy);
    }

    pub fn totals(&self) -> &BTreeMap<String, RunningTotals> {
        &self.totals
    }

    /// Cumulative snapshot as of the end of `round_number`.
    pub fn snapshot(&self, season: i32, round_number: u32) -> Vec<RoundMetrics> {
        self.totals
            .iter()
            .filter(|(_, totals)| totals.tips_seen > 0)
            .map(|(model, totals)| RoundMetrics {
                season,
                round_number,
                ml_model: model.clone(),
                cumulative_correct_count: totals.correct,
                cumulative_accuracy: totals.correct as f64 / totals.tips_seen as f64,
                cumulative_mean_absolute_error: (totals.margin_tips_seen > 0).then(|| {
                    round2(totals.margin_error_sum / totals.margin_tips_seen as f64)
                }),
                cumulative_margin_difference: totals.margin_error_sum,
                cumulative_bits: (totals.probability_tips_seen > 0).then_some(totals.bits_sum),
            })
            .collect()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct MetricsAggregator {
    store: Arc<dyn TipStore>,
    policy: MarginModelBits,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn TipStore>, policy: MarginModelBits) -> Self {
        Self { store, policy }
    }

    /// Scored (match, prediction) pairs for the season in aggregation order:
    /// round ascending, ties by match start time.
    async fn scored_tips(&self, season: i32) -> Result<Vec<(Match, Prediction)>> {
        let mut matches: Vec<Match> = self
            .store
            .matches_for_season(season)
            .await?
            .into_iter()
            .filter(Match::has_results)
            .collect();
        matches.sort_by_key(|m| (m.round_number, m.start_date_time));

        let mut tips = Vec::new();
        for m in matches {
            for prediction in self.store.predictions_for_match(&m.key()).await? {
                tips.push((m.clone(), prediction));
            }
        }

        Ok(tips)
    }

    /// From-scratch recomputation: one snapshot per completed round, in
    /// round order.
    pub async fn season_metrics(&self, season: i32) -> Result<Vec<RoundMetrics>> {
        let tips = self.scored_tips(season).await?;

        let mut accumulator = SeasonAccumulator::new(self.policy);
        let mut snapshots = Vec::new();
        let mut current_round: Option<u32> = None;

        for (m, prediction) in &tips {
            if let Some(round) = current_round {
                if m.round_number != round {
                    snapshots.extend(accumulator.snapshot(season, round));
                }
            }
            current_round = Some(m.round_number);
            accumulator.apply(m, prediction);
        }

        if let Some(round) = current_round {
            snapshots.extend(accumulator.snapshot(season, round));
        }

        Ok(snapshots)
    }

    /// Cumulative metrics as of the latest completed round.
    pub async fn latest_metrics(&self, season: i32) -> Result<Vec<RoundMetrics>> {
        let tips = self.scored_tips(season).await?;

        let mut accumulator = SeasonAccumulator::new(self.policy);
        let mut last_round = 0;
        for (m, prediction) in &tips {
            last_round = last_round.max(m.round_number);
            accumulator.apply(m, prediction);
        }

        Ok(accumulator.snapshot(season, last_round))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MatchKey;
    use chrono::{Duration, TimeZone, Utc};

    fn played_match(round_number: u32, home: &str, away: &str, winner: &str, margin: u32) -> Match {
        Match {
            season: 2017,
            round_number,
            venue: "MCG".to_string(),
            start_date_time: Utc.with_ymd_and_hms(2017, 3, 23, 9, 0, 0).unwrap()
                + Duration::days(i64::from(round_number) * 7),
            home_team: home.to_string(),
            away_team: away.to_string(),
            winner: Some(winner.to_string()),
            margin: Some(margin),
        }
    }

    fn key_of(m: &Match) -> MatchKey {
        m.key()
    }

    #[test]
    fn margin_difference_scenario() {
        // Predicted the winner by 12, actual margin 10.
        assert_eq!(margin_difference(12.0, 10.0, true), 2.0);
        // Tipped the wrong side: both margins count against the tip.
        assert_eq!(margin_difference(12.0, 10.0, false), 22.0);
    }

    #[test]
    fn bits_scenario() {
        let winner_bits = bits(0.8, true, false);
        let loser_bits = bits(0.8, false, false);

        assert!((winner_bits - 0.678).abs() < 0.001);
        assert!((loser_bits - (-1.322)).abs() < 0.001);
    }

    #[test]
    fn bits_draw_and_clamping() {
        let draw_bits = bits(0.5, false, true);
        assert!((draw_bits - 0.0).abs() < 1e-9);

        // A certain prediction that loses is clamped, not -inf.
        let certain_loss = bits(1.0, false, false);
        assert!(certain_loss.is_finite());
    }

    #[test]
    fn draw_counts_as_correct_for_everyone() {
        let mut m = played_match(1, "Richmond", "Carlton", "Richmond", 0);
        m.winner = None;

        let prediction =
            Prediction::margin(key_of(&m), "line_model", "Carlton", 5.0).unwrap();
        let mut accumulator = SeasonAccumulator::new(MarginModelBits::Exclude);
        accumulator.apply(&m, &prediction);

        assert_eq!(accumulator.totals()["line_model"].correct, 1);
    }

    #[test]
    fn missing_probability_scores_as_neutral() {
        let m = played_match(1, "Richmond", "Carlton", "Richmond", 10);
        let mut prediction =
            Prediction::win_probability(key_of(&m), "proba_model", "Richmond", 0.8).unwrap();
        prediction.predicted_win_probability = None;

        let mut accumulator = SeasonAccumulator::new(MarginModelBits::Exclude);
        accumulator.apply(&m, &prediction);

        let totals = &accumulator.totals()["proba_model"];
        assert!((totals.bits_sum - bits(0.5, true, false)).abs() < 1e-9);
    }

    #[test]
    fn margin_models_have_no_bits_under_exclude_policy() {
        let m = played_match(1, "Richmond", "Carlton", "Richmond", 10);
        let prediction = Prediction::margin(key_of(&m), "line_model", "Richmond", 12.0).unwrap();

        let mut excluding = SeasonAccumulator::new(MarginModelBits::Exclude);
        excluding.apply(&m, &prediction);
        assert_eq!(excluding.snapshot(2017, 1)[0].cumulative_bits, None);

        let mut zeroing = SeasonAccumulator::new(MarginModelBits::Zero);
        zeroing.apply(&m, &prediction);
        assert_eq!(zeroing.snapshot(2017, 1)[0].cumulative_bits, Some(0.0));
    }

    #[test]
    fn snapshot_reports_rounded_mae_and_accuracy_bounds() {
        let mut accumulator = SeasonAccumulator::new(MarginModelBits::Exclude);

        let m1 = played_match(1, "Richmond", "Carlton", "Richmond", 10);
        let m2 = played_match(1, "Essendon", "Hawthorn", "Hawthorn", 7);
        let p1 = Prediction::margin(key_of(&m1), "line_model", "Richmond", 12.0).unwrap();
        let p2 = Prediction::margin(key_of(&m2), "line_model", "Essendon", 3.0).unwrap();

        accumulator.apply(&m1, &p1);
        accumulator.apply(&m2, &p2);

        let snapshot = accumulator.snapshot(2017, 1);
        let metrics = &snapshot[0];

        // (|12-10| + (3+7)) / 2 = 6.0
        assert_eq!(metrics.cumulative_mean_absolute_error, Some(6.0));
        assert_eq!(metrics.cumulative_margin_difference, 12.0);
        assert_eq!(metrics.cumulative_correct_count, 1);
        assert!((0.0..=1.0).contains(&metrics.cumulative_accuracy));
        assert_eq!(metrics.cumulative_accuracy, 0.5);
    }

    #[tokio::test]
    async fn incremental_matches_from_scratch() {
        use crate::storage::{MemoryStore, TipStore};

        let store = Arc::new(MemoryStore::new());
        let mut expected = SeasonAccumulator::new(MarginModelBits::Exclude);

        let rows = [
            (1, "Richmond", "Carlton", "Richmond", 10, "Richmond", 12.0),
            (1, "Essendon", "Hawthorn", "Hawthorn", 7, "Essendon", 3.0),
            (2, "Richmond", "Essendon", "Richmond", 21, "Richmond", 18.0),
            (3, "Carlton", "Hawthorn", "Carlton", 2, "Hawthorn", 9.0),
        ];

        for (round, home, away, winner, margin, tipped, predicted) in rows {
            let m = played_match(round, home, away, winner, margin);
            store.upsert_match(&m).await.unwrap();
            store
                .set_match_result(
                    &m.key(),
                    &crate::domain::MatchResult {
                        winner: m.winner.clone(),
                        margin,
                        home_score: 80 + margin,
                        away_score: 80,
                    },
                )
                .await
                .unwrap();

            let prediction =
                Prediction::margin(m.key(), "line_model", tipped, predicted).unwrap();
            store.create_prediction(&prediction).await.unwrap();
            expected.apply(&m, &prediction);
        }

        let aggregator = MetricsAggregator::new(store, MarginModelBits::Exclude);
        let snapshots = aggregator.season_metrics(2017).await.unwrap();

        // One snapshot per completed round, cumulative along the way.
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots.last(), expected.snapshot(2017, 3).first());

        let latest = aggregator.latest_metrics(2017).await.unwrap();
        assert_eq!(latest, expected.snapshot(2017, 3));
    }
}
