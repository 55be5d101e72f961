//! Feed fetching with a bounded retry budget.
//!
//! Every attempt runs the full pipeline: authenticate (when a credential
//! rule applies), GET, status check, parse, and a sanity check that the
//! document exposes a feed title. A fixed delay separates attempts; there
//! is no exponential backoff. Only the final outcome crosses this module's
//! boundary — the poll cycle treats an exhausted budget as "skip this feed
//! for the current cycle", never as cycle-fatal.

use crate::auth::{AuthError, Authenticator};
use crate::creds::CredentialRule;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("feedwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Body could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Parsed, but exposes no feed title — not actually a feed
    #[error("Document exposes no feed title")]
    MissingTitle,
    /// Authentication failed during an attempt (retried like any failure)
    #[error(transparent)]
    Auth(AuthError),
    /// Credential configuration error; bypasses the retry loop entirely
    #[error("Credential configuration error: {0}")]
    Config(#[source] AuthError),
}

/// A successfully fetched and parsed feed.
#[derive(Debug)]
pub struct FetchedFeed {
    /// Title declared by the feed document (the registry's feed key).
    pub title: String,
    /// Entries in feed-source order. Entries with no usable timestamp
    /// have already been dropped.
    pub entries: Vec<Entry>,
}

/// One feed entry, reduced to the fields delivery needs.
#[derive(Debug, Clone)]
pub struct Entry {
    pub title: String,
    pub link: Option<String>,
    /// Published instant, falling back to the entry's updated time.
    pub published: DateTime<Utc>,
}

/// Fetches and parses feed URLs, with bounded retries and fixed backoff.
pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self, FetchError> {
        // The cookie store carries the CSRF login session into the fetch.
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true)
            .build()?;
        Ok(Self { client })
    }

    /// Fetch `url`, authenticating with `rule` when one is given.
    ///
    /// Makes up to 3 attempts with a fixed 2-second delay between them;
    /// the first success short-circuits. An unrecognized auth scheme is a
    /// configuration error and fails immediately without retries.
    pub async fn fetch(
        &self,
        url: &str,
        rule: Option<&CredentialRule>,
    ) -> Result<FetchedFeed, FetchError> {
        let authenticator = match rule {
            Some(rule) => Some(Authenticator::new(rule).map_err(FetchError::Config)?),
            None => None,
        };

        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(url, authenticator.as_ref()).await {
                Ok(feed) => return Ok(feed),
                Err(e) => {
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %e,
                        "Feed fetch attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        // last_error is always set: the loop runs at least once.
        Err(last_error.unwrap_or(FetchError::MissingTitle))
    }

    async fn attempt(
        &self,
        url: &str,
        authenticator: Option<&Authenticator<'_>>,
    ) -> Result<FetchedFeed, FetchError> {
        if let Some(auth) = authenticator {
            auth.login(&self.client, url).await.map_err(FetchError::Auth)?;
        }

        let mut request = self.client.get(url);
        if let Some(auth) = authenticator {
            request = auth.apply(request);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = response.bytes().await?;
        let feed =
            feed_rs::parser::parse(&bytes[..]).map_err(|e| FetchError::Parse(e.to_string()))?;

        let title = feed
            .title
            .map(|t| t.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(FetchError::MissingTitle)?;

        let total = feed.entries.len();
        let entries: Vec<Entry> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let published = entry.published.or(entry.updated)?;
                Some(Entry {
                    title: entry
                        .title
                        .map(|t| t.content)
                        .unwrap_or_else(|| "Untitled".to_string()),
                    link: entry.links.first().map(|l| l.href.clone()),
                    published,
                })
            })
            .collect();

        let dropped = total - entries.len();
        if dropped > 0 {
            tracing::warn!(
                url = %url,
                dropped = dropped,
                "Entries without a published or updated timestamp dropped"
            );
        }

        Ok(FetchedFeed { title, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use wiremock::matchers::{any, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test Feed</title>
    <item>
        <title>First</title>
        <link>https://example.com/1</link>
        <pubDate>Wed, 01 May 2024 10:00:00 GMT</pubDate>
    </item>
</channel></rss>"#;

    const UNTITLED_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>Orphan</title></item>
</channel></rss>"#;

    fn plain_rule() -> CredentialRule {
        CredentialRule {
            rule: "example.com".to_string(),
            login_url: "https://never-contacted.invalid/login".to_string(),
            username: "alice".to_string(),
            password: SecretString::from("hunter2"),
            auth_type: "plain".to_string(),
        }
    }

    #[tokio::test]
    async fn fetch_success_parses_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let feed = fetcher
            .fetch(&format!("{}/feed", server.uri()), None)
            .await
            .unwrap();

        assert_eq!(feed.title, "Test Feed");
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.entries[0].title, "First");
        assert_eq!(
            feed.entries[0].link.as_deref(),
            Some("https://example.com/1")
        );
    }

    #[tokio::test]
    async fn fetch_retries_then_succeeds() {
        let server = MockServer::start().await;

        // First two attempts fail with a server error, the third succeeds.
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let feed = fetcher
            .fetch(&format!("{}/feed", server.uri()), None)
            .await
            .unwrap();
        assert_eq!(feed.title, "Test Feed");
    }

    #[tokio::test]
    async fn fetch_exhausts_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let result = fetcher.fetch(&format!("{}/feed", server.uri()), None).await;

        match result {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn feed_without_title_is_not_a_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(UNTITLED_RSS))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new().unwrap();
        let result = fetcher.fetch(&format!("{}/feed", server.uri()), None).await;

        assert!(matches!(result, Err(FetchError::MissingTitle)));
    }

    #[tokio::test]
    async fn plain_auth_sends_authorization_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&server)
            .await;

        let rule = plain_rule();
        let fetcher = FeedFetcher::new().unwrap();
        let feed = fetcher
            .fetch(&format!("{}/feed", server.uri()), Some(&rule))
            .await
            .unwrap();
        assert_eq!(feed.title, "Test Feed");
    }

    #[tokio::test]
    async fn unknown_auth_scheme_fails_without_any_request() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(0)
            .mount(&server)
            .await;

        let mut rule = plain_rule();
        rule.auth_type = "kerberos".to_string();

        let fetcher = FeedFetcher::new().unwrap();
        let result = fetcher
            .fetch(&format!("{}/feed", server.uri()), Some(&rule))
            .await;

        assert!(matches!(result, Err(FetchError::Config(_))));
    }
}
