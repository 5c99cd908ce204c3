//! Access decisions over granted scope sets.
//!
//! A [`ScopeSet`] is the authoritative set of permissions attached to an
//! access grant. Resource routers gate individual operations with
//! [`ScopeSet::has`]; the set always comes from what an authorization server
//! actually granted, never from what was requested.
//!
//! When no resource authorization server is configured at all,
//! [`GroupAccessPolicy`] derives a fixed scope set from the validated
//! identity's group memberships. This is an explicitly degraded mode.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::AccessConfig;

/// A set of granted scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Empty scope set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-delimited scope string as returned by a token endpoint.
    #[must_use]
    pub fn from_delimited(scope: &str) -> Self {
        Self(scope.split_whitespace().map(ToString::to_string).collect())
    }

    /// Whether `required` is present in the granted set.
    #[must_use]
    pub fn has(&self, required: &str) -> bool {
        self.0.contains(required)
    }

    /// Number of granted scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the granted scopes in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{scope}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<String> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(ToString::to_string).collect())
    }
}

/// Group-membership fallback policy.
///
/// Grants a fixed scope set to members of any listed group. Active only when
/// no resource authorization server is configured.
#[derive(Debug, Clone, Default)]
pub struct GroupAccessPolicy {
    /// Groups whose members receive the fallback scopes
    groups: Vec<String>,
    /// Scopes granted on a group match
    scopes: Vec<String>,
}

impl GroupAccessPolicy {
    /// Create a policy from explicit group and scope lists.
    #[must_use]
    pub fn new(groups: Vec<String>, scopes: Vec<String>) -> Self {
        Self { groups, scopes }
    }

    /// Build the policy from configuration.
    #[must_use]
    pub fn from_config(config: &AccessConfig) -> Self {
        Self::new(
            config.fallback_groups.clone(),
            config.fallback_scopes.clone(),
        )
    }

    /// Evaluate the policy against a user's group memberships.
    ///
    /// Returns the granted scope set when any membership matches, `None`
    /// otherwise. An empty policy never grants.
    #[must_use]
    pub fn evaluate(&self, memberships: &[String]) -> Option<ScopeSet> {
        if self.groups.iter().any(|g| memberships.contains(g)) {
            Some(self.scopes.iter().map(String::as_str).collect())
        } else {
            None
        }
    }
}
