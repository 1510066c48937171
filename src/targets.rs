// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decryption domain targets.
//!
//! A target is a bare `host[/path]` pattern, never a URL:
//!
//! | Pattern               | Host              | Path              |
//! |-----------------------|-------------------|-------------------|
//! | `api.example.com`     | exact             | any               |
//! | `*.example.com`       | ends with         | any               |
//! | `example.com/v1/pay`  | exact             | exact             |
//! | `*.example.com/v1/*`  | ends with         | starts with       |

use serde_json::Value;

/// Host half of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMatcher {
    Absolute(String),
    /// Suffix match; the leading `*` is stripped
    Wildcard(String),
}

impl HostMatcher {
    /// Hosts compare lowercase, the same as request targets.
    fn parse(pattern: &str) -> Self {
        let pattern = pattern.to_ascii_lowercase();
        match pattern.strip_prefix('*') {
            Some(suffix) => HostMatcher::Wildcard(suffix.to_string()),
            None => HostMatcher::Absolute(pattern),
        }
    }

    /// Host, or suffix for a wildcard.
    pub fn value(&self) -> &str {
        match self {
            HostMatcher::Absolute(v) | HostMatcher::Wildcard(v) => v,
        }
    }

    /// Compare against a lowercase host.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostMatcher::Absolute(v) => host == v,
            HostMatcher::Wildcard(suffix) => host.ends_with(suffix.as_str()),
        }
    }
}

/// Path half of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    Absolute(String),
    /// Prefix match; the trailing `*` is stripped
    Wildcard(String),
}

impl PathMatcher {
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => PathMatcher::Wildcard(prefix.to_string()),
            None => PathMatcher::Absolute(pattern.to_string()),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            PathMatcher::Absolute(v) | PathMatcher::Wildcard(v) => v,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::Absolute(v) => path == v,
            PathMatcher::Wildcard(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// A parsed `host[/path]` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainTarget {
    raw: String,
    host: HostMatcher,
    path: Option<PathMatcher>,
}

impl DomainTarget {
    /// Parse a pattern. Empty input and URLs with a scheme yield `None`.
    pub fn parse(input: &str) -> Option<Self> {
        if input.is_empty() || input.starts_with("http://") || input.starts_with("https://") {
            return None;
        }

        let (host, path) = match input.find('/') {
            Some(index) => (&input[..index], Some(PathMatcher::parse(&input[index..]))),
            None => (input, None),
        };

        Some(Self {
            raw: input.to_string(),
            host: HostMatcher::parse(host),
            path,
        })
    }

    /// Parse an untyped API value; anything but a string yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_str().and_then(Self::parse)
    }

    /// The pattern as configured.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn host(&self) -> &HostMatcher {
        &self.host
    }

    /// Path matcher, if the pattern has a path.
    pub fn path(&self) -> Option<&PathMatcher> {
        self.path.as_ref()
    }

    /// Host must match; the path must too when the target has one.
    pub fn matches(&self, host: &str, path: &str) -> bool {
        match &self.path {
            Some(path_matcher) => self.host.matches(host) && path_matcher.matches(path),
            None => self.host.matches(host),
        }
    }
}

/// Parse every usable pattern, dropping the rest.
pub fn parse_targets<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Vec<DomainTarget> {
    patterns.into_iter().filter_map(DomainTarget::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_host_is_absolute_without_path() {
        let target = DomainTarget::parse("google.com").unwrap();
        assert_eq!(target.host(), &HostMatcher::Absolute("google.com".to_string()));
        assert!(target.path().is_none());
    }

    #[test]
    fn wildcards_on_both_halves() {
        let target = DomainTarget::parse("*.google.com/users/*").unwrap();
        assert!(matches!(target.host(), HostMatcher::Wildcard(_)));
        assert_eq!(target.host().value(), ".google.com");

        let path = target.path().unwrap();
        assert!(matches!(path, PathMatcher::Wildcard(_)));
        assert_eq!(path.value(), "/users/");
    }

    #[test]
    fn rejects_urls_and_non_strings() {
        assert!(DomainTarget::parse("https://x.com").is_none());
        assert!(DomainTarget::parse("http://x.com").is_none());
        assert!(DomainTarget::parse("").is_none());
        assert!(DomainTarget::from_value(&json!(false)).is_none());
        assert!(DomainTarget::from_value(&json!(null)).is_none());
        assert!(DomainTarget::from_value(&json!("x.com")).is_some());
    }

    #[test]
    fn path_requires_both_matchers() {
        let target = DomainTarget::parse("*.google.com/users/*").unwrap();
        assert!(target.matches("api.google.com", "/users/42"));
        assert!(!target.matches("api.google.com", "/orders/42"));
        assert!(!target.matches("api.bing.com", "/users/42"));
    }

    #[test]
    fn host_only_target_ignores_path() {
        let target = DomainTarget::parse("api.stripe.com").unwrap();
        assert!(target.matches("api.stripe.com", "/anything"));
        assert!(target.matches("api.stripe.com", ""));
        assert!(!target.matches("stripe.com", "/anything"));
    }

    #[test]
    fn host_pattern_case_is_ignored() {
        let target = DomainTarget::parse("API.Stripe.com/V1/*").unwrap();
        assert_eq!(target.host().value(), "api.stripe.com");
        assert!(target.matches("api.stripe.com", "/V1/charges"));
        assert!(!target.matches("api.stripe.com", "/v1/charges"));
        assert_eq!(target.raw(), "API.Stripe.com/V1/*");

        let wildcard = DomainTarget::parse("*.Example.COM").unwrap();
        assert!(wildcard.matches("pay.example.com", "/"));
    }

    #[test]
    fn absolute_path_is_exact() {
        let target = DomainTarget::parse("pay.example.com/v1/charge").unwrap();
        assert!(target.matches("pay.example.com", "/v1/charge"));
        assert!(!target.matches("pay.example.com", "/v1/charge/extra"));
    }

    #[test]
    fn parse_targets_skips_invalid_entries() {
        let targets = parse_targets(["a.com", "https://b.com", "", "*.c.com"]);
        let raw: Vec<&str> = targets.iter().map(DomainTarget::raw).collect();
        assert_eq!(raw, vec!["a.com", "*.c.com"]);
    }
}
