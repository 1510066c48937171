// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Normalised destination of an outgoing request.

use std::fmt;

use url::Url;

use super::error::RelayError;

const HTTPS_PORT: u16 = 443;
const HTTP_PORT: u16 = 80;

/// Request described as separate fields rather than a URL.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// `https`, `https:` or `http`; defaults to `https`
    pub protocol: Option<String>,
    /// Host, optionally with `:port`
    pub host: Option<String>,
    /// Bare host name; preferred over `host`
    pub hostname: Option<String>,
    pub port: Option<u16>,
    /// Path, optionally with a query string; defaults to `/`
    pub path: Option<String>,
}

/// Where a request is going, independent of how the caller described it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub host: String,
    pub port: u16,
    /// Path without the query string
    pub path: String,
    pub secure: bool,
}

impl RequestTarget {
    /// Target for a parsed URL. Default ports follow the scheme.
    pub fn from_url(url: &Url) -> Result<Self, RelayError> {
        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(RelayError::InvalidTarget(format!("unsupported scheme {other}")))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| RelayError::InvalidTarget(format!("{url} has no host")))?;

        Ok(Self {
            host: host.to_ascii_lowercase(),
            port: url.port().unwrap_or_else(|| default_port(secure)),
            path: url.path().to_string(),
            secure,
        })
    }

    /// Target for a URL string.
    pub fn parse(url: &str) -> Result<Self, RelayError> {
        let url = Url::parse(url).map_err(|e| RelayError::InvalidTarget(e.to_string()))?;
        Self::from_url(&url)
    }

    /// `host:port`, as used in the CONNECT request line.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value for the `Host` header; the port is omitted when it is the
    /// scheme default.
    pub fn host_header(&self) -> String {
        if self.port == default_port(self.secure) {
            self.host.clone()
        } else {
            self.authority()
        }
    }
}

impl TryFrom<&RequestOptions> for RequestTarget {
    type Error = RelayError;

    fn try_from(options: &RequestOptions) -> Result<Self, Self::Error> {
        let secure = match options
            .protocol
            .as_deref()
            .map(|p| p.trim_end_matches(':').to_ascii_lowercase())
            .as_deref()
        {
            None | Some("https") => true,
            Some("http") => false,
            Some(other) => {
                return Err(RelayError::InvalidTarget(format!("unsupported protocol {other}")))
            }
        };

        let (host, host_port) = match (&options.hostname, &options.host) {
            (Some(hostname), _) => (hostname.clone(), None),
            (None, Some(host)) => split_host_port(host)?,
            (None, None) => {
                return Err(RelayError::InvalidTarget("missing host".to_string()))
            }
        };
        if host.is_empty() {
            return Err(RelayError::InvalidTarget("empty host".to_string()));
        }

        let path = options.path.as_deref().unwrap_or("/");
        let path = path.split('?').next().unwrap_or(path);

        Ok(Self {
            host: host.to_ascii_lowercase(),
            port: options
                .port
                .or(host_port)
                .unwrap_or_else(|| default_port(secure)),
            path: path.to_string(),
            secure,
        })
    }
}

impl TryFrom<RequestOptions> for RequestTarget {
    type Error = RelayError;

    fn try_from(options: RequestOptions) -> Result<Self, Self::Error> {
        RequestTarget::try_from(&options)
    }
}

impl TryFrom<&Url> for RequestTarget {
    type Error = RelayError;

    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        RequestTarget::from_url(url)
    }
}

impl TryFrom<&str> for RequestTarget {
    type Error = RelayError;

    fn try_from(url: &str) -> Result<Self, Self::Error> {
        RequestTarget::parse(url)
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}{}", self.host_header(), self.path)
    }
}

fn default_port(secure: bool) -> u16 {
    if secure {
        HTTPS_PORT
    } else {
        HTTP_PORT
    }
}

fn split_host_port(host: &str) -> Result<(String, Option<u16>), RelayError> {
    // Bracketed IPv6 literals contain colons of their own.
    if host.starts_with('[') {
        return match host.rfind("]:") {
            Some(i) => Ok((host[..=i].to_string(), Some(parse_port(&host[i + 2..])?))),
            None => Ok((host.to_string(), None)),
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) => Ok((name.to_string(), Some(parse_port(port)?))),
        None => Ok((host.to_string(), None)),
    }
}

fn parse_port(port: &str) -> Result<u16, RelayError> {
    port.parse()
        .map_err(|_| RelayError::InvalidTarget(format!("invalid port {port}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_url_string() {
        let target = RequestTarget::parse("https://API.Stripe.com/v1/charges?limit=3").unwrap();
        assert_eq!(target.host, "api.stripe.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.path, "/v1/charges");
        assert!(target.secure);
        assert_eq!(target.host_header(), "api.stripe.com");
        assert_eq!(target.authority(), "api.stripe.com:443");
    }

    #[test]
    fn non_default_port_appears_in_host_header() {
        let target = RequestTarget::parse("http://localhost:8080/health").unwrap();
        assert!(!target.secure);
        assert_eq!(target.host_header(), "localhost:8080");
    }

    #[test]
    fn from_options_object() {
        let options = RequestOptions {
            protocol: Some("https:".to_string()),
            host: Some("example.com:8443".to_string()),
            path: Some("/users/1?expand=true".to_string()),
            ..Default::default()
        };
        let target = RequestTarget::try_from(&options).unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 8443);
        assert_eq!(target.path, "/users/1");

        let options = RequestOptions {
            hostname: Some("example.com".to_string()),
            host: Some("ignored.com".to_string()),
            ..Default::default()
        };
        let target = RequestTarget::try_from(options).unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.path, "/");
    }

    #[test]
    fn all_shapes_normalise_equally() {
        let url = Url::parse("https://example.com/a").unwrap();
        let from_url = RequestTarget::try_from(&url).unwrap();
        let from_str = RequestTarget::try_from("https://example.com/a").unwrap();
        let from_options = RequestTarget::try_from(RequestOptions {
            host: Some("example.com".to_string()),
            path: Some("/a".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(from_url, from_str);
        assert_eq!(from_url, from_options);
    }

    #[test]
    fn rejects_unusable_input() {
        assert!(RequestTarget::parse("ftp://example.com").is_err());
        assert!(RequestTarget::parse("not a url").is_err());
        assert!(RequestTarget::try_from(RequestOptions::default()).is_err());
        assert!(RequestTarget::try_from(RequestOptions {
            host: Some("example.com:http".to_string()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn ipv6_host_with_port() {
        let target = RequestTarget::try_from(RequestOptions {
            host: Some("[::1]:9000".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(target.host, "[::1]");
        assert_eq!(target.port, 9000);
    }
}
