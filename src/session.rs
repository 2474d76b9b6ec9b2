//! Authenticated scraping/submission sessions.
//!
//! The external fixture and competition sites have no API: everything goes
//! through logged-in HTML pages. A session is a scoped resource — jobs open
//! one at the start, and close (log out) on every exit path — with cookie
//! state living only for the invocation.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, TiplineError};

// Response-body markers the sites use for rejected logins.
const LOGIN_REJECTION_MARKERS: [&str; 2] = ["Sorry, the alias", "Wrong passwd"];

// Markers that a supposedly-authenticated page bounced us back to the login
// form (session expiry).
const LOGIN_PAGE_MARKERS: [&str; 2] = ["name=\"passwd\"", "id=\"signin\""];

/// Transport seam so session logic is testable without a live site.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<String>;
    async fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<String>;
}

/// reqwest-backed transport with a cookie store and per-request timeouts.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SessionTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(TiplineError::Ingestion(format!("HTTP {status} from {url}")));
        }

        Ok(response.text().await?)
    }

    async fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<String> {
        let response = self.client.post(url).form(fields).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(TiplineError::Submission(format!("HTTP {status} from {url}")));
        }

        Ok(response.text().await?)
    }
}

/// Credentials for one external site.
#[derive(Clone)]
pub struct SessionCredentials {
    pub username: String,
    pub password: String,
}

/// An authenticated session against one scraping/submission site.
///
/// Methods take `&self` so one session can serve bounded-concurrent page
/// fetches; the cookie store lives in the transport.
pub struct ScrapingSession {
    transport: Arc<dyn SessionTransport>,
    base_url: String,
    credentials: SessionCredentials,
    max_login_attempts: u32,
    logged_in: AtomicBool,
}

impl std::fmt::Debug for ScrapingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapingSession")
            .field("base_url", &self.base_url)
            .field("max_login_attempts", &self.max_login_attempts)
            .field("logged_in", &self.logged_in)
            .finish_non_exhaustive()
    }
}

impl ScrapingSession {
    /// Open a session and log in.
    pub async fn open(
        base_url: &str,
        credentials: SessionCredentials,
        timeout_secs: u64,
        max_login_attempts: u32,
    ) -> Result<Self> {
        let transport = Box::new(HttpTransport::new(timeout_secs)?);
        Self::open_with_transport(transport, base_url, credentials, max_login_attempts).await
    }

    /// Open a session over an explicit transport (tests use a scripted one).
    pub async fn open_with_transport(
        transport: Box<dyn SessionTransport>,
        base_url: &str,
        credentials: SessionCredentials,
        max_login_attempts: u32,
    ) -> Result<Self> {
        let session = Self {
            transport: Arc::from(transport),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            max_login_attempts,
            logged_in: AtomicBool::new(false),
        };

        session.login().await?;
        Ok(session)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn login(&self) -> Result<()> {
        let fields = [
            ("name", self.credentials.username.as_str()),
            ("passwd", self.credentials.password.as_str()),
        ];

        let mut last_error = None;

        for attempt in 1..=self.max_login_attempts {
            match self.transport.post_form(&self.url("login"), &fields).await {
                Ok(body) => {
                    if let Some(marker) = LOGIN_REJECTION_MARKERS
                        .iter()
                        .find(|marker| body.contains(**marker))
                    {
                        // Rejected credentials won't improve with retries.
                        return Err(TiplineError::Authentication(format!(
                            "login rejected by {} ({marker:?})",
                            self.base_url
                        )));
                    }

                    self.logged_in.store(true, Ordering::SeqCst);
                    debug!(site = %self.base_url, "session established");
                    return Ok(());
                }
                Err(e) => {
                    warn!(site = %self.base_url, attempt, "login attempt failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(TiplineError::Authentication(format!(
            "login to {} failed after {} attempts: {}",
            self.base_url,
            self.max_login_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn looks_like_login_page(body: &str) -> bool {
        LOGIN_PAGE_MARKERS.iter().any(|marker| body.contains(*marker))
    }

    /// Fetch an authenticated page, re-logging-in once if the session has
    /// expired under us.
    pub async fn fetch_page(&self, path: &str) -> Result<String> {
        let body = self.transport.get(&self.url(path)).await?;

        if !Self::looks_like_login_page(&body) {
            return Ok(body);
        }

        debug!(site = %self.base_url, path, "session expired, re-authenticating");
        self.logged_in.store(false, Ordering::SeqCst);
        self.login().await?;

        let body = self.transport.get(&self.url(path)).await?;
        if Self::looks_like_login_page(&body) {
            return Err(TiplineError::Authentication(format!(
                "still unauthenticated after re-login to {}",
                self.base_url
            )));
        }

        Ok(body)
    }

    /// Post an authenticated form (tip submissions). Sites answer an expired
    /// session with the login form instead of an error status, so the
    /// response body is checked before the post counts as accepted.
    pub async fn submit_form(&self, path: &str, fields: &[(&str, &str)]) -> Result<String> {
        if !self.logged_in.load(Ordering::SeqCst) {
            self.login().await?;
        }

        let body = self.transport.post_form(&self.url(path), fields).await?;
        if !Self::looks_like_login_page(&body) {
            return Ok(body);
        }

        debug!(site = %self.base_url, path, "session expired, re-authenticating");
        self.logged_in.store(false, Ordering::SeqCst);
        self.login().await?;

        let body = self.transport.post_form(&self.url(path), fields).await?;
        if Self::looks_like_login_page(&body) {
            return Err(TiplineError::Submission(format!(
                "{} bounced the form to its login page twice",
                self.base_url
            )));
        }

        Ok(body)
    }

    /// Log out and drop the session. Logout failures are logged, not
    /// propagated: the cookies die with the invocation anyway.
    pub async fn close(self) {
        if !self.logged_in.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.transport.get(&self.url("logout")).await {
            warn!(site = %self.base_url, "logout failed: {e}");
        }
    }
}

// Jobs can be cancelled mid-await when they outrun their wall-clock budget,
// which skips `close`. A still-logged-in session sends its logout from a
// detached task instead of leaving the site session dangling.
impl Drop for ScrapingSession {
    fn drop(&mut self) {
        if !self.logged_in.swap(false, Ordering::SeqCst) {
            return;
        }

        let transport = self.transport.clone();
        let url = self.url("logout");
        let site = self.base_url.clone();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = transport.get(&url).await {
                    warn!(site = %site, "logout failed: {e}");
                }
            });
        }
    }
}
