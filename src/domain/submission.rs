use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::matches::MatchKey;
use crate::error::{Result, TiplineError};

/// Submission status for one (match, model, competition) tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmissionStatus {
    /// Tip selected but not yet sent
    Pending,
    /// Submission in flight; blocks overlapping attempts
    Submitting,
    /// Confirmed by the competition site (terminal, never retried)
    Submitted,
    /// Rejected or transport failure; retryable until the cap
    Failed,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Submitted)
    }

    /// Whether a new submission attempt may start from this state.
    pub fn can_begin_attempt(&self) -> bool {
        matches!(self, SubmissionStatus::Pending | SubmissionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Submitting => "SUBMITTING",
            SubmissionStatus::Submitted => "SUBMITTED",
            SubmissionStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tracked submission state per (match, model, competition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub match_key: MatchKey,
    pub ml_model: String,
    pub competition: String,
    pub status: SubmissionStatus,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(match_key: MatchKey, ml_model: &str, competition: &str) -> Self {
        Self {
            match_key,
            ml_model: ml_model.to_string(),
            competition: competition.to_string(),
            status: SubmissionStatus::Pending,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }

    /// Apply a state transition, rejecting anything the machine doesn't
    /// allow. `Submitting` also bumps the attempt counter.
    pub fn transition(&mut self, to: SubmissionStatus) -> Result<()> {
        use SubmissionStatus::*;

        let allowed = matches!(
            (self.status, to),
            (Pending, Submitting) | (Failed, Submitting) | (Submitting, Submitted) | (Submitting, Failed)
        );

        if !allowed {
            return Err(TiplineError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        if to == Submitting {
            self.attempts += 1;
        }

        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> Submission {
        Submission::new(
            MatchKey {
                season: 2017,
                round_number: 1,
                home_team: "Richmond".to_string(),
                away_team: "Carlton".to_string(),
            },
            "line_model",
            "monash_normal",
        )
    }

    #[test]
    fn happy_path_transitions() {
        let mut s = submission();
        s.transition(SubmissionStatus::Submitting).unwrap();
        assert_eq!(s.attempts, 1);
        s.transition(SubmissionStatus::Submitted).unwrap();
        assert!(s.status.is_terminal());
    }

    #[test]
    fn failed_submissions_can_retry() {
        let mut s = submission();
        s.transition(SubmissionStatus::Submitting).unwrap();
        s.transition(SubmissionStatus::Failed).unwrap();
        assert!(s.status.can_begin_attempt());

        s.transition(SubmissionStatus::Submitting).unwrap();
        assert_eq!(s.attempts, 2);
    }

    #[test]
    fn submitted_is_terminal() {
        let mut s = submission();
        s.transition(SubmissionStatus::Submitting).unwrap();
        s.transition(SubmissionStatus::Submitted).unwrap();

        assert!(s.transition(SubmissionStatus::Submitting).is_err());
        assert!(s.transition(SubmissionStatus::Failed).is_err());
    }

    #[test]
    fn cannot_complete_without_submitting() {
        let mut s = submission();
        assert!(s.transition(SubmissionStatus::Submitted).is_err());
    }
}
