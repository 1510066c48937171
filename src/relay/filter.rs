// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Which destinations go through the relay.

use std::fmt;

use super::config::RelayConfigCache;
use super::target::RequestTarget;
use crate::targets::{parse_targets, DomainTarget};

/// A destination is intercepted when it matches a configured decryption
/// domain or a domain from the polled relay config.
#[derive(Clone, Default)]
pub struct DecryptionDomainFilter {
    static_targets: Vec<DomainTarget>,
    relay_config: Option<RelayConfigCache>,
}

impl DecryptionDomainFilter {
    /// Filter over configured targets and, optionally, polled domains.
    pub fn new(static_targets: Vec<DomainTarget>, relay_config: Option<RelayConfigCache>) -> Self {
        Self {
            static_targets,
            relay_config,
        }
    }

    /// Static targets from raw patterns; unparseable ones are skipped.
    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(parse_targets(patterns), None)
    }

    /// Add polled destination domains.
    pub fn with_relay_config(mut self, relay_config: RelayConfigCache) -> Self {
        self.relay_config = Some(relay_config);
        self
    }

    /// Targets from configuration.
    pub fn static_targets(&self) -> &[DomainTarget] {
        &self.static_targets
    }

    /// True if any static target or polled domain matches.
    pub fn matches(&self, host: &str, path: &str) -> bool {
        self.static_targets.iter().any(|t| t.matches(host, path))
            || self
                .relay_config
                .as_ref()
                .is_some_and(|c| c.matches_host(host))
    }

    pub fn should_intercept(&self, target: &RequestTarget) -> bool {
        self.matches(&target.host, &target.path)
    }
}

impl fmt::Debug for DecryptionDomainFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionDomainFilter")
            .field("static_targets", &self.static_targets)
            .field("relay_config", &self.relay_config.is_some())
            .finish()
    }
}
