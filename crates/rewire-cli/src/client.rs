//! Small blocking HTTP client for the daemon's admin and observe endpoints.

use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Authenticated client for one rewire deployment.
pub struct AdminClient {
    base_url: String,
    token: String,
    http: reqwest::blocking::Client,
}

impl AdminClient {
    /// Build a client for `base_url`, authenticating admin calls with
    /// `token`.
    ///
    /// # Errors
    ///
    /// Fails only if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    /// POST a form to an admin endpoint and parse the JSON response.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and non-2xx responses; the response body is
    /// included verbatim so validation messages reach the operator.
    pub fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .form(form)
            .send()
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            bail!("{url} returned {status}: {}", body.trim());
        }
        serde_json::from_str(&body).with_context(|| format!("{url} returned non-JSON: {body}"))
    }

    /// GET a JSON endpoint (no auth; the path carries the capability).
    ///
    /// # Errors
    ///
    /// Fails on transport errors and non-2xx responses.
    pub fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            bail!("{url} returned {status}: {}", body.trim());
        }
        serde_json::from_str(&body).with_context(|| format!("{url} returned non-JSON: {body}"))
    }
}
