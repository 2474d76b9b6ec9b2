pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod predictions;
pub mod scheduler;
pub mod session;
pub mod sources;
pub mod storage;
pub mod supervisor;

pub use config::AppConfig;
pub use domain::{
    Match, MatchKey, MatchResult, MlModel, Prediction, PredictionType, Submission,
    SubmissionStatus, TeamMatch,
};
pub use error::{Result, TiplineError};
pub use metrics::{MetricsAggregator, RoundMetrics, SeasonAccumulator};
pub use predictions::{PredictionRequestor, TipSubmitter};
pub use scheduler::{JobContext, Scheduler};
pub use session::ScrapingSession;
pub use sources::{FixtureFetcher, ResultFetcher};
pub use storage::{MemoryStore, TipStore};
pub use supervisor::ErrorReporter;
