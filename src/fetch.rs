use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};

use crate::config::HttpConfig;
use crate::retry::RetryPolicy;

/// Retrieves page content. Implementations retry internally and only return
/// an error once their attempts are exhausted.
pub trait Fetcher: Send + Sync {
    fn fetch_page(&self, url: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("invalid user agent header")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if let Some(referer) = &config.referer {
            headers.insert(
                REFERER,
                HeaderValue::from_str(referer).context("invalid referer header")?,
            );
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(config.timeout_secs.clamp(1, 10)))
            .redirect(reqwest::redirect::Policy::limited(10))
            .default_headers(headers)
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            retry: config.retry_policy(),
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    fn get_once(&self, url: &str) -> anyhow::Result<String> {
        if !self.request_delay.is_zero() {
            std::thread::sleep(self.request_delay);
        }
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {url}: unexpected status {status}");
        }
        response
            .text()
            .with_context(|| format!("read body: {url}"))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_page(&self, url: &str) -> anyhow::Result<String> {
        tracing::debug!(url, "fetching page");
        self.retry.run(&format!("fetch {url}"), |_| self.get_once(url))
    }
}
