//! Match-result ingestion.
//!
//! Only persisted matches with null results are considered, and only once
//! enough game time has elapsed for them to have finished. Results are
//! set-once: re-runs over already-set rows are no-ops, and a scraped result
//! disagreeing with a stored one is rejected without touching the row.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{normalize_team_name, Match, MatchResult};
use crate::error::{Result, TiplineError};
use crate::session::ScrapingSession;
use crate::storage::TipStore;

/// What one sync pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResultSyncReport {
    pub candidates: usize,
    pub results_set: usize,
    pub conflicts: usize,
    pub still_pending: usize,
}

pub struct ResultFetcher {
    store: Arc<dyn TipStore>,
}

impl ResultFetcher {
    pub fn new(store: Arc<dyn TipStore>) -> Self {
        Self { store }
    }

    /// Backfill results for played matches missing them, then refresh the
    /// correctness flag of every prediction on each updated match.
    pub async fn sync(
        &self,
        session: &ScrapingSession,
        season: i32,
        round_filter: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<ResultSyncReport> {
        let candidates: Vec<Match> = self
            .store
            .matches_missing_results(season)
            .await?
            .into_iter()
            .filter(|m| round_filter.map_or(true, |round| m.round_number == round))
            .filter(|m| m.has_been_played(now))
            .collect();

        let mut report = ResultSyncReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            return Ok(report);
        }

        let page = session.fetch_page(&format!("results/{season}")).await?;
        let scores = parse_result_page(&page)?;

        for m in candidates {
            let Some((home_score, away_score)) =
                scores.get(&(m.round_number, m.home_team.clone(), m.away_team.clone()))
            else {
                report.still_pending += 1;
                continue;
            };

            let result =
                MatchResult::from_scores(&m.home_team, &m.away_team, *home_score, *away_score);

            match self.store.set_match_result(&m.key(), &result).await {
                Ok(()) => {
                    self.refresh_prediction_correctness(&m, &result).await?;
                    report.results_set += 1;
                }
                // Conflicting source data must not poison the rest of the
                // batch; the stored row stays as it was.
                Err(TiplineError::DataIntegrity(reason)) => {
                    warn!(match_key = %m.key(), "conflicting result rejected: {reason}");
                    report.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            season,
            set = report.results_set,
            conflicts = report.conflicts,
            pending = report.still_pending,
            "result sync complete"
        );
        Ok(report)
    }

    async fn refresh_prediction_correctness(&self, m: &Match, result: &MatchResult) -> Result<()> {
        let mut played = m.clone();
        played.winner = result.winner.clone();
        played.margin = Some(result.margin);

        for prediction in self.store.predictions_for_match(&m.key()).await? {
            if let Some(is_correct) = prediction.calculate_whether_correct(&played) {
                self.store
                    .update_prediction_correctness(&m.key(), &prediction.ml_model, is_correct)
                    .await?;
            }
        }

        Ok(())
    }
}

type ScoreMap = HashMap<(u32, String, String), (u32, u32)>;

fn cell_texts(row: ElementRef<'_>) -> Vec<String> {
    let cell_selector = Selector::parse("td").unwrap();
    row.select(&cell_selector)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect()
}

/// Parse the season results table: `round | home | away | home score | away
/// score`. Rows for matches still in progress carry empty score cells and are
/// skipped.
fn parse_result_page(html: &str) -> Result<ScoreMap> {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("table.results tbody tr, table.results tr").unwrap();

    let rows: Vec<_> = document.select(&row_selector).collect();
    if rows.is_empty() {
        return Err(TiplineError::Ingestion(
            "results page contained no results table rows".to_string(),
        ));
    }

    let mut scores = ScoreMap::new();

    for row in rows {
        let cells = cell_texts(row);
        if cells.is_empty() {
            continue;
        }

        match parse_result_row(&cells) {
            Ok(Some((key, score))) => {
                scores.insert(key, score);
            }
            Ok(None) => {}
            Err(e) => warn!(row = ?cells, "skipping result row: {e}"),
        }
    }

    Ok(scores)
}

#[allow(clippy::type_complexity)]
fn parse_result_row(cells: &[String]) -> Result<Option<((u32, String, String), (u32, u32))>> {
    let [round, home, away, home_score, away_score] = cells else {
        return Err(TiplineError::Ingestion(format!(
            "expected 5 result cells, got {}",
            cells.len()
        )));
    };

    if home_score.is_empty() || away_score.is_empty() {
        return Ok(None);
    }

    let round_number: u32 = round
        .parse()
        .map_err(|_| TiplineError::Ingestion(format!("unparseable round {round:?}")))?;
    let home_team = normalize_team_name(home)
        .ok_or_else(|| TiplineError::Ingestion(format!("unknown team {home:?}")))?;
    let away_team = normalize_team_name(away)
        .ok_or_else(|| TiplineError::Ingestion(format!("unknown team {away:?}")))?;
    let home_score: u32 = home_score
        .parse()
        .map_err(|_| TiplineError::Ingestion(format!("unparseable score {home_score:?}")))?;
    let away_score: u32 = away_score
        .parse()
        .map_err(|_| TiplineError::Ingestion(format!("unparseable score {away_score:?}")))?;

    Ok(Some((
        (round_number, home_team.to_string(), away_team.to_string()),
        (home_score, away_score),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MatchKey, Prediction};
    use crate::session::{SessionCredentials, SessionTransport};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;

    const RESULTS_PAGE: &str = r#"
        <table class="results">
          <tr><th>Round</th><th>Home</th><th>Away</th><th>Home score</th><th>Away score</th></tr>
          <tr><td>1</td><td>Richmond</td><td>Carlton</td><td>132</td><td>89</td></tr>
          <tr><td>1</td><td>GWS Giants</td><td>Adelaide</td><td></td><td></td></tr>
        </table>
    "#;

    struct OnePageSite;

    #[async_trait]
    impl SessionTransport for OnePageSite {
        async fn get(&self, _url: &str) -> crate::error::Result<String> {
            Ok(RESULTS_PAGE.to_string())
        }

        async fn post_form(
            &self,
            _url: &str,
            _fields: &[(&str, &str)],
        ) -> crate::error::Result<String> {
            Ok("welcome".to_string())
        }
    }

    async fn test_session() -> ScrapingSession {
        ScrapingSession::open_with_transport(
            Box::new(OnePageSite),
            "https://results.example.com",
            SessionCredentials {
                username: "tipper".to_string(),
                password: "secret".to_string(),
            },
            1,
        )
        .await
        .unwrap()
    }

    fn stored_match(home: &str, away: &str, round_number: u32) -> Match {
        Match {
            season: 2017,
            round_number,
            venue: "MCG".to_string(),
            start_date_time: Utc.with_ymd_and_hms(2017, 3, 23, 9, 0, 0).unwrap(),
            home_team: home.to_string(),
            away_team: away.to_string(),
            winner: None,
            margin: None,
        }
    }

    #[test]
    fn parses_scores_and_skips_in_progress_rows() {
        let scores = parse_result_page(RESULTS_PAGE).unwrap();

        assert_eq!(scores.len(), 1);
        assert_eq!(
            scores[&(1, "Richmond".to_string(), "Carlton".to_string())],
            (132, 89)
        );
    }

    #[tokio::test]
    async fn sets_results_and_refreshes_correctness() {
        let store = Arc::new(MemoryStore::new());
        let m = stored_match("Richmond", "Carlton", 1);
        store.upsert_match(&m).await.unwrap();

        let prediction =
            Prediction::margin(m.key(), "tipresias_margin", "Richmond", 12.0).unwrap();
        store.create_prediction(&prediction).await.unwrap();

        let fetcher = ResultFetcher::new(store.clone());
        let session = test_session().await;
        let now = Utc.with_ymd_and_hms(2017, 3, 24, 0, 0, 0).unwrap();

        let report = fetcher.sync(&session, 2017, None, now).await.unwrap();
        assert_eq!(report.results_set, 1);

        let stored = store.get_match(&m.key()).await.unwrap().unwrap();
        assert_eq!(stored.winner.as_deref(), Some("Richmond"));
        assert_eq!(stored.margin, Some(43));

        let predictions = store.predictions_for_match(&m.key()).await.unwrap();
        assert_eq!(predictions[0].is_correct, Some(true));
    }

    #[tokio::test]
    async fn unplayed_matches_are_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let m = stored_match("Richmond", "Carlton", 1);
        store.upsert_match(&m).await.unwrap();

        let fetcher = ResultFetcher::new(store.clone());
        let session = test_session().await;
        // An hour into the game: not yet considered played.
        let now = m.start_date_time + chrono::Duration::hours(1);

        let report = fetcher.sync(&session, 2017, None, now).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(report.results_set, 0);

        let key = MatchKey {
            season: 2017,
            round_number: 1,
            home_team: "Richmond".to_string(),
            away_team: "Carlton".to_string(),
        };
        assert!(store.get_match(&key).await.unwrap().unwrap().margin.is_none());
    }
}
