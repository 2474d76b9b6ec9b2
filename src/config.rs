use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub fixture_source: FixtureSourceConfig,
    pub prediction_service: PredictionServiceConfig,
    #[serde(default)]
    pub competitions: Vec<CompetitionConfig>,
    pub submission: SubmissionConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Query API port (default: 8080)
    #[serde(default)]
    pub api_port: Option<u16>,
    /// Error-reporting webhook URL; alerts are log-only when unset
    #[serde(default)]
    pub error_webhook_url: Option<String>,
}

/// Scraped fixture/results site and its login credentials
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureSourceConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Login attempts before authentication is considered fatal
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_login_attempts() -> u32 {
    3
}

/// External prediction service (black-box model host)
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionServiceConfig {
    pub base_url: String,
    /// Bearer token; omitted outside production
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_prediction_timeout")]
    pub request_timeout_secs: u64,
}

fn default_prediction_timeout() -> u64 {
    300
}

/// One external tipping competition
#[derive(Debug, Clone, Deserialize)]
pub struct CompetitionConfig {
    /// Unique competition id, e.g. "monash_normal"
    pub name: String,
    /// Which prediction value the site's tip form takes
    pub prediction_type: crate::domain::PredictionType,
    pub base_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    /// Maximum submission attempts per (match, model, competition)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Principal model name per prediction type
    pub principal_models: PrincipalModels,
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrincipalModels {
    #[serde(default)]
    pub margin: Option<String>,
    #[serde(default)]
    pub win_probability: Option<String>,
}

/// How margin-only models enter the combined bits total. The original
/// competition only defines bits for probability models, so there is no
/// implicit default here: the deployment has to pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginModelBits {
    /// Margin models carry no bits totals at all
    Exclude,
    /// Margin models accumulate a constant zero
    Zero,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub margin_model_bits: MarginModelBits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Weekly fixture sync cadence
    #[serde(default = "default_fixture_interval")]
    pub fixture_sync_interval_hours: u64,
    /// Daily prediction generation cadence
    #[serde(default = "default_prediction_interval")]
    pub prediction_interval_hours: u64,
    /// Result sync cadence (several times a day during the season)
    #[serde(default = "default_result_interval")]
    pub result_sync_interval_hours: u64,
    /// Wall-clock budget per ingestion job
    #[serde(default = "default_job_budget")]
    pub job_budget_secs: u64,
    /// Bounded concurrent external requests per job
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Model names for the daily prediction job (comma-separated in env form)
    #[serde(default)]
    pub prediction_models: Vec<String>,
}

fn default_fixture_interval() -> u64 {
    24 * 7
}

fn default_prediction_interval() -> u64 {
    24
}

fn default_result_interval() -> u64 {
    6
}

fn default_job_budget() -> u64 {
    20 * 60
}

fn default_fetch_concurrency() -> usize {
    4
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fixture_sync_interval_hours: default_fixture_interval(),
            prediction_interval_hours: default_prediction_interval(),
            result_sync_interval_hours: default_result_interval(),
            job_budget_secs: default_job_budget(),
            fetch_concurrency: default_fetch_concurrency(),
            prediction_models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("schedule.fetch_concurrency", 4)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TIPLINE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TIPLINE_FIXTURE_SOURCE__PASSWORD, etc.)
            .add_source(
                Environment::with_prefix("TIPLINE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.submission.max_retries == 0 {
            errors.push("submission.max_retries must be at least 1".to_string());
        }

        if self.schedule.fetch_concurrency == 0 {
            errors.push("schedule.fetch_concurrency must be at least 1".to_string());
        }

        if self.schedule.job_budget_secs == 0 {
            errors.push("schedule.job_budget_secs must be positive".to_string());
        }

        for competition in &self.competitions {
            let principal = match competition.prediction_type {
                crate::domain::PredictionType::Margin => &self.submission.principal_models.margin,
                crate::domain::PredictionType::WinProbability => {
                    &self.submission.principal_models.win_probability
                }
            };

            if principal.is_none() {
                errors.push(format!(
                    "competition '{}' takes {} tips, but no principal {} model is configured",
                    competition.name, competition.prediction_type, competition.prediction_type
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
