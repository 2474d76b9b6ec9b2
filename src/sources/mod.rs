//! Ingestion from external HTML sources: fixtures and match results.

pub mod fixtures;
pub mod results;

pub use fixtures::{FixtureFetcher, FixtureSyncReport};
pub use results::{ResultFetcher, ResultSyncReport};
