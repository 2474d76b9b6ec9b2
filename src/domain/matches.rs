use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Rough estimate of match length; exactitude isn't necessary here.
pub const GAME_LENGTH_HRS: i64 = 3;

/// Natural key for a match: no two matches share a season, round and
/// home/away pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchKey {
    pub season: i32,
    pub round_number: u32,
    pub home_team: String,
    pub away_team: String,
}

impl std::fmt::Display for MatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} R{} {} v {}",
            self.season, self.round_number, self.home_team, self.away_team
        )
    }
}

/// Final result fields for a played match.
///
/// `winner` is `None` for a draw; `margin` is always the absolute points
/// difference (0 for a draw).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub winner: Option<String>,
    pub margin: u32,
    pub home_score: u32,
    pub away_score: u32,
}

impl MatchResult {
    /// Derive the result from final scores.
    pub fn from_scores(home_team: &str, away_team: &str, home_score: u32, away_score: u32) -> Self {
        let winner = match home_score.cmp(&away_score) {
            std::cmp::Ordering::Greater => Some(home_team.to_string()),
            std::cmp::Ordering::Less => Some(away_team.to_string()),
            std::cmp::Ordering::Equal => None,
        };

        Self {
            winner,
            margin: home_score.abs_diff(away_score),
            home_score,
            away_score,
        }
    }

    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }
}

/// A scheduled (and eventually played) match.
///
/// Created by the fixture fetcher when first seen; `winner`/`margin` are
/// populated only by the result fetcher and never change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub season: i32,
    pub round_number: u32,
    pub venue: String,
    pub start_date_time: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub winner: Option<String>,
    pub margin: Option<u32>,
}

impl Match {
    pub fn key(&self) -> MatchKey {
        MatchKey {
            season: self.season,
            round_number: self.round_number,
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
        }
    }

    /// Whether enough time has passed for the match to have finished.
    pub fn has_been_played(&self, now: DateTime<Utc>) -> bool {
        self.start_date_time + Duration::hours(GAME_LENGTH_HRS) < now
    }

    /// Whether result fields have been set.
    pub fn has_results(&self) -> bool {
        self.margin.is_some()
    }

    /// A played match with a margin of zero and no winner is a draw.
    pub fn is_draw(&self) -> bool {
        self.margin == Some(0) && self.winner.is_none()
    }
}

/// Per-team participation in a match: home/away flag and final score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMatch {
    pub match_key: MatchKey,
    pub team: String,
    pub at_home: bool,
    pub score: Option<u32>,
}

impl TeamMatch {
    /// Build the home/away pair for a fixture row (scores unset).
    pub fn pair_for(m: &Match) -> (TeamMatch, TeamMatch) {
        let key = m.key();
        (
            TeamMatch {
                match_key: key.clone(),
                team: m.home_team.clone(),
                at_home: true,
                score: None,
            },
            TeamMatch {
                match_key: key,
                team: m.away_team.clone(),
                at_home: false,
                score: None,
            },
        )
    }
}
