use serde::Deserialize;

use crate::identity::{Identity, Principal, PrincipalKind};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub https_only: bool,
}

/// Identity granted to management requests without authentication, for operational
/// bootstrapping.
///
/// Applies to plaintext requests, or to HTTPS requests only when `https_only` is set.
#[derive(Debug)]
pub struct FixedManagementIdentity {
    user: String,
    https_only: bool,
}

impl FixedManagementIdentity {
    pub fn new(config: &Config) -> Option<Self> {
        let user = config
            .user
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())?;

        Some(Self {
            user: user.to_string(),
            https_only: config.https_only,
        })
    }

    pub fn applies(&self, secure: bool) -> bool {
        secure == self.https_only
    }

    pub fn identity(&self) -> Identity {
        Identity::new(
            self.user.clone(),
            Principal::new(PrincipalKind::Management, self.user.clone()),
        )
    }
}
