pub mod matches;
pub mod ml_model;
pub mod prediction;
pub mod submission;
pub mod teams;

pub use matches::{Match, MatchKey, MatchResult, TeamMatch, GAME_LENGTH_HRS};
pub use ml_model::{MlModel, PredictionType};
pub use prediction::Prediction;
pub use submission::{Submission, SubmissionStatus};
pub use teams::{display_name_for_site, normalize_team_name, CANONICAL_TEAMS};
