//! Credential rules and URL-to-rule resolution.
//!
//! Rules are declared as wildcard `domain` or `domain/path` headers. A rule
//! matches a URL when the URL's domain ends with the rule's domain and, if
//! the rule carries a path, the URL's path (leading slash stripped) starts
//! with it. Rules are scanned in declaration order and the last match wins,
//! so later, more specific rules override earlier ones.

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// A single credential rule from the configuration file.
///
/// `auth_type` is kept as a string here and validated when a fetch builds
/// its authenticator, so a typo only poisons the feeds the rule matches.
#[derive(Deserialize)]
pub struct CredentialRule {
    /// Wildcard `domain` or `domain/path` header this rule applies to.
    pub rule: String,
    /// URL where the login flow is performed.
    pub login_url: String,
    pub username: String,
    pub password: SecretString,
    /// Authentication scheme: `"plain"` or `"csrf"` (default).
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
}

fn default_auth_type() -> String {
    "csrf".to_string()
}

/// Mask the password in Debug output to prevent secret leakage in logs.
impl std::fmt::Debug for CredentialRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRule")
            .field("rule", &self.rule)
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("auth_type", &self.auth_type)
            .finish()
    }
}

/// Resolves feed URLs to credential rules.
pub struct CredentialResolver {
    rules: Vec<CredentialRule>,
}

impl CredentialResolver {
    pub fn new(rules: Vec<CredentialRule>) -> Self {
        Self { rules }
    }

    /// Find the credential rule for `url`, if any.
    ///
    /// Scans every rule in declaration order, keeping the last one that
    /// matches. `None` means the feed is fetched unauthenticated.
    pub fn resolve(&self, url: &str) -> Option<&CredentialRule> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Unparseable URL, no credential lookup");
                return None;
            }
        };
        let domain = parsed.host_str().unwrap_or("");
        let path = parsed.path().trim_start_matches('/');

        let mut found = None;
        for rule in &self.rules {
            let matched = header_matches(&rule.rule, domain, path);
            tracing::debug!(rule = %rule.rule, url = %url, matched = matched, "Credential rule check");
            if matched {
                found = Some(rule);
            }
        }

        if found.is_none() {
            tracing::debug!(url = %url, "No credential rule matched, fetching unauthenticated");
        }
        found
    }
}

/// Does a wildcard `domain` or `domain/path` header match the given URL parts?
///
/// `path` must already have its leading slash stripped.
fn header_matches(header: &str, domain: &str, path: &str) -> bool {
    let header = header.trim_start_matches('*');
    match header.split_once('/') {
        Some((rule_domain, rule_path)) => {
            domain.ends_with(rule_domain) && path.starts_with(rule_path)
        }
        None => domain.ends_with(header),
    }
}
