//! Caller identity shared by every authenticator, the resource-security enforcer and the
//! request handlers.
//!
//! An [`Identity`] is built once per request and never mutated afterwards: `user` is the
//! canonical (user-mapped) name, while the [`Principal`] keeps the raw credential subject
//! for auditing and impersonation decisions.

pub mod route;

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

pub use route::{Route, SecurityCategory};

/// How the principal was established.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// Caller-asserted name, accepted without verification.
    Trusted,
    Password,
    Certificate,
    Token,
    Management,
    Internal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Principal {
    kind: PrincipalKind,
    name: String,
}

impl Principal {
    pub fn new(kind: PrincipalKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Identity {
    user: String,
    principal: Principal,
    groups: BTreeSet<String>,
}

impl Identity {
    pub fn new(user: impl Into<String>, principal: Principal) -> Self {
        Self {
            user: user.into(),
            principal,
            groups: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_groups<I>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.groups.extend(groups);
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// The identity to act under once impersonation of `target_user` has been allowed.
    ///
    /// The original principal is kept so audit trails still point at the real caller; groups
    /// belong to the original user and are dropped.
    pub fn impersonate(&self, target_user: &str) -> Identity {
        Identity::new(target_user, self.principal.clone())
    }
}
