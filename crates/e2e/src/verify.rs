//! Page content verification

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

static TITLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<title.*?>(.+?)<").expect("title pattern is valid"));

/// Inner text of the first title element, up to the next `<`
pub fn extract_title(body: &str) -> Option<&str> {
    TITLE_PATTERN
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Fetches a page once and checks its title
pub struct ContentVerifier {
    client: reqwest::Client,
}

impl ContentVerifier {
    pub fn new() -> E2eResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder().no_proxy().build()?,
        })
    }

    /// GET the page and pull out its title
    pub async fn fetch_title(&self, url: &str) -> E2eResult<String> {
        let resp = self.client.get(url).send().await?;
        debug!("GET {} -> {}", url, resp.status());

        let body = resp.text().await?;
        extract_title(&body)
            .map(str::to_string)
            .ok_or_else(|| E2eError::MissingTitle(url.to_string()))
    }

    /// Fetch the page and require its title to equal `expected` exactly
    pub async fn verify(&self, url: &str, expected: &str) -> E2eResult<String> {
        let actual = self.fetch_title(url).await?;
        if actual != expected {
            return Err(E2eError::AssertionFailed {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(actual)
    }
}
