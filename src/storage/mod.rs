use async_trait::async_trait;

use crate::domain::{Match, MatchKey, MatchResult, MlModel, Prediction, Submission, TeamMatch};
use crate::error::Result;

pub mod memory;

pub use memory::MemoryStore;

/// Storage contract consumed from the external persistence layer.
///
/// Every write is an idempotent per-row operation: overlapping invocations
/// performing the same upserts must converge to the same final state.
/// Implementations own atomicity; callers never hold locks.
#[async_trait]
pub trait TipStore: Send + Sync {
    /// Insert or update a match by its natural key. Never touches result
    /// fields on an existing row; those belong to [`set_match_result`].
    ///
    /// [`set_match_result`]: TipStore::set_match_result
    async fn upsert_match(&self, m: &Match) -> Result<()>;

    /// Insert or update a team-match row. Stored scores are preserved.
    async fn upsert_team_match(&self, tm: &TeamMatch) -> Result<()>;

    async fn get_match(&self, key: &MatchKey) -> Result<Option<Match>>;

    async fn matches_for_season(&self, season: i32) -> Result<Vec<Match>>;

    /// Matches whose result fields are still null.
    async fn matches_missing_results(&self, season: i32) -> Result<Vec<Match>>;

    async fn team_matches_for(&self, key: &MatchKey) -> Result<Vec<TeamMatch>>;

    /// Set result fields exactly once. A no-op when the identical result is
    /// already stored; `DataIntegrityError` when a different one is.
    async fn set_match_result(&self, key: &MatchKey, result: &MatchResult) -> Result<()>;

    /// Create-only: an existing (match, model) row makes this fail with
    /// `DuplicatePredictionError`.
    async fn create_prediction(&self, prediction: &Prediction) -> Result<()>;

    /// Update the derived correctness flag, the one mutable prediction field.
    async fn update_prediction_correctness(
        &self,
        key: &MatchKey,
        ml_model: &str,
        is_correct: bool,
    ) -> Result<()>;

    async fn predictions_for_match(&self, key: &MatchKey) -> Result<Vec<Prediction>>;

    async fn predictions_for_season(&self, season: i32) -> Result<Vec<Prediction>>;

    async fn upsert_ml_model(&self, model: &MlModel) -> Result<()>;

    async fn list_ml_models(&self) -> Result<Vec<MlModel>>;

    async fn get_submission(
        &self,
        key: &MatchKey,
        ml_model: &str,
        competition: &str,
    ) -> Result<Option<Submission>>;

    /// Compare-and-set guard for at-most-once submission: atomically moves
    /// the row to `SUBMITTING` and returns it, or returns `None` when another
    /// attempt is in flight or the tip is already submitted. Exceeding
    /// `max_retries` fails with `SubmissionRetriesExhausted`.
    async fn begin_submission(
        &self,
        key: &MatchKey,
        ml_model: &str,
        competition: &str,
        max_retries: u32,
    ) -> Result<Option<Submission>>;

    async fn complete_submission(
        &self,
        key: &MatchKey,
        ml_model: &str,
        competition: &str,
    ) -> Result<()>;

    async fn fail_submission(&self, key: &MatchKey, ml_model: &str, competition: &str)
        -> Result<()>;
}
