//! Fixture ingestion.
//!
//! The fixture site serves one HTML table per season (or per round), rows of
//! `round | date-time | home | away | venue`. Parsed rows are normalized to
//! the canonical team vocabulary and upserted by natural key, so re-running
//! against identical data changes nothing.

use chrono::{NaiveDateTime, TimeZone, Utc};
use futures::{stream, StreamExt};
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{normalize_team_name, Match, TeamMatch};
use crate::error::{Result, TiplineError};
use crate::session::ScrapingSession;
use crate::storage::TipStore;

const FIXTURE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// What one sync pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FixtureSyncReport {
    pub rows_seen: usize,
    pub matches_upserted: usize,
    pub rows_skipped: usize,
}

pub struct FixtureFetcher {
    store: Arc<dyn TipStore>,
    fetch_concurrency: usize,
}

impl FixtureFetcher {
    pub fn new(store: Arc<dyn TipStore>, fetch_concurrency: usize) -> Self {
        Self {
            store,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Sync fixtures for a season, optionally restricted to specific rounds.
    ///
    /// With a round filter the per-round pages are fetched with bounded
    /// concurrency and ingested as they arrive; a failed round never discards
    /// the others, its error is propagated after the healthy rounds land.
    pub async fn sync(
        &self,
        session: &ScrapingSession,
        season: i32,
        rounds: Option<&[u32]>,
    ) -> Result<FixtureSyncReport> {
        let mut report = FixtureSyncReport::default();
        let mut first_error = None;

        match rounds {
            Some(rounds) => {
                let mut pages = stream::iter(rounds.iter().copied())
                    .map(|round| {
                        let path = format!("fixtures/{season}/round/{round}");
                        async move { (round, session.fetch_page(&path).await) }
                    })
                    .buffer_unordered(self.fetch_concurrency);

                while let Some((round, fetched)) = pages.next().await {
                    let outcome = match fetched {
                        Ok(page) => self.ingest_page(&page, season, &mut report).await,
                        Err(e) => Err(e),
                    };

                    if let Err(e) = outcome {
                        warn!(season, round, "round sync failed: {e}");
                        first_error.get_or_insert(e);
                    }
                }
            }
            None => {
                let page = session.fetch_page(&format!("fixtures/{season}")).await?;
                self.ingest_page(&page, season, &mut report).await?;
            }
        }

        info!(
            season,
            upserted = report.matches_upserted,
            skipped = report.rows_skipped,
            "fixture sync complete"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn ingest_page(
        &self,
        html: &str,
        season: i32,
        report: &mut FixtureSyncReport,
    ) -> Result<()> {
        let parsed = parse_fixture_page(html, season)?;
        report.rows_seen += parsed.rows_seen;
        report.rows_skipped += parsed.rows_skipped;

        for m in parsed.matches {
            let (home, away) = TeamMatch::pair_for(&m);
            self.store.upsert_match(&m).await?;
            self.store.upsert_team_match(&home).await?;
            self.store.upsert_team_match(&away).await?;
            report.matches_upserted += 1;
        }

        Ok(())
    }
}

#[derive(Debug)]
struct ParsedFixturePage {
    matches: Vec<Match>,
    rows_seen: usize,
    rows_skipped: usize,
}

fn cell_texts(row: ElementRef<'_>) -> Vec<String> {
    let cell_selector = Selector::parse("td").unwrap();
    row.select(&cell_selector)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect()
}

/// Parse the fixture listing. A document without a fixture table is an
/// ingestion error; individual malformed rows are skipped, not fatal.
fn parse_fixture_page(html: &str, season: i32) -> Result<ParsedFixturePage> {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("table.fixture tbody tr, table.fixture tr").unwrap();

    let rows: Vec<_> = document.select(&row_selector).collect();
    if rows.is_empty() {
        return Err(TiplineError::Ingestion(
            "fixture page contained no fixture table rows".to_string(),
        ));
    }

    let mut parsed = ParsedFixturePage {
        matches: Vec::new(),
        rows_seen: 0,
        rows_skipped: 0,
    };

    for row in rows {
        let cells = cell_texts(row);
        // Header rows carry <th> cells only.
        if cells.is_empty() {
            continue;
        }

        parsed.rows_seen += 1;
        match parse_fixture_row(&cells, season) {
            Ok(m) => parsed.matches.push(m),
            Err(e) => {
                warn!(season, row = ?cells, "skipping fixture row: {e}");
                parsed.rows_skipped += 1;
            }
        }
    }

    Ok(parsed)
}

fn parse_fixture_row(cells: &[String], season: i32) -> Result<Match> {
    let [round, date_time, home, away, venue] = cells else {
        return Err(TiplineError::Ingestion(format!(
            "expected 5 fixture cells, got {}",
            cells.len()
        )));
    };

    let round_number: u32 = round
        .trim_start_matches(['R', 'r'])
        .parse()
        .map_err(|_| TiplineError::Ingestion(format!("unparseable round {round:?}")))?;

    let naive = NaiveDateTime::parse_from_str(date_time, FIXTURE_DATE_FORMAT)
        .map_err(|_| TiplineError::Ingestion(format!("unparseable date {date_time:?}")))?;
    let start_date_time = Utc.from_utc_datetime(&naive);

    let home_team = normalize_team_name(home)
        .ok_or_else(|| TiplineError::Ingestion(format!("unknown team {home:?}")))?;
    let away_team = normalize_team_name(away)
        .ok_or_else(|| TiplineError::Ingestion(format!("unknown team {away:?}")))?;

    Ok(Match {
        season,
        round_number,
        venue: venue.clone(),
        start_date_time,
        home_team: home_team.to_string(),
        away_team: away_team.to_string(),
        winner: None,
        margin: None,
    })
}
