//! Webhook error reporting
//!
//! Fatal pipeline conditions (exhausted submission retries, failed jobs) go
//! to an operator webhook instead of crashing the process. Reporting is
//! optional: without a configured URL everything still lands in the logs.

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    Warning,
    Error,
    Fatal,
}

#[derive(Serialize)]
struct Report<'a> {
    level: ReportLevel,
    component: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
}

/// Webhook reporting client
#[derive(Clone)]
pub struct ErrorReporter {
    client: Client,
    webhook_url: String,
}

impl ErrorReporter {
    /// Create a reporter from the environment, if configured.
    pub fn from_env() -> Option<Arc<Self>> {
        std::env::var("TIPLINE_ERROR_WEBHOOK_URL").ok().map(|url| {
            info!("error webhook reporting enabled");
            Self::new(url)
        })
    }

    /// Create a reporter with an explicit URL.
    pub fn new(webhook_url: String) -> Arc<Self> {
        Arc::new(Self {
            client: Client::new(),
            webhook_url,
        })
    }

    /// Create a reporter from config, if a URL is set.
    pub fn from_config(webhook_url: Option<&str>) -> Option<Arc<Self>> {
        webhook_url.map(|url| {
            info!("error webhook reporting enabled");
            Self::new(url.to_string())
        })
    }

    async fn send(&self, report: &Report<'_>) -> Result<(), String> {
        match self
            .client
            .post(&self.webhook_url)
            .json(report)
            .send()
            .await
        {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("error report delivered");
                    Ok(())
                } else {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    error!("error report rejected: {} - {}", status, body);
                    Err(format!("HTTP {}: {}", status, body))
                }
            }
            Err(e) => {
                error!("error report request failed: {}", e);
                Err(e.to_string())
            }
        }
    }

    /// Report a condition. Delivery failures are logged and swallowed; the
    /// pipeline never fails because reporting did.
    pub async fn report(
        &self,
        level: ReportLevel,
        component: &str,
        message: &str,
        metadata: Option<Value>,
    ) {
        warn!(component, message, "reporting pipeline condition");

        let report = Report {
            level,
            component,
            message,
            metadata,
        };

        if let Err(e) = self.send(&report).await {
            error!("failed to deliver error report: {}", e);
        }
    }

    /// Report a failed scheduled job.
    pub async fn report_job_failure(&self, job_id: &str, run_id: &str, error: &str) {
        self.report(
            ReportLevel::Error,
            "scheduler",
            error,
            Some(serde_json::json!({ "job_id": job_id, "run_id": run_id })),
        )
        .await;
    }
}
