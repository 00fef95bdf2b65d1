//! Policy collaborator consulted by the resource-security enforcer.
//!
//! Only two capability checks are modelled: impersonating another user and reading system
//! information (management endpoints). Everything else about authorization belongs to the
//! query engine.

mod rules;

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use crate::configuration::Error as ConfigError;
use crate::identity::Identity;
pub use rules::{PolicyConfig, RuleBasedAccessControl};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub impersonation: Option<PolicyConfig>,
    #[serde(default)]
    pub system_information: Option<PolicyConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessDenied(String);

impl AccessDenied {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn cannot_impersonate_user(identity: &Identity, target_user: &str) -> Self {
        Self(format!(
            "User {} cannot impersonate user {target_user}",
            identity.user()
        ))
    }

    pub fn cannot_read_system_information() -> Self {
        Self("Cannot read system information".to_string())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Access Denied: {}", self.0)
    }
}

pub trait AccessControl: Send + Sync {
    fn check_can_impersonate_user(
        &self,
        identity: &Identity,
        target_user: &str,
    ) -> Result<(), AccessDenied>;

    fn check_can_read_system_information(&self, identity: &Identity) -> Result<(), AccessDenied>;
}

/// Grants both capabilities to every authenticated identity.
pub struct AllowAllAccessControl;

impl AccessControl for AllowAllAccessControl {
    fn check_can_impersonate_user(&self, _: &Identity, _: &str) -> Result<(), AccessDenied> {
        Ok(())
    }

    fn check_can_read_system_information(&self, _: &Identity) -> Result<(), AccessDenied> {
        Ok(())
    }
}

pub fn from_config(config: Option<&Config>) -> Result<Arc<dyn AccessControl>, ConfigError> {
    match config {
        Some(config) => Ok(Arc::new(RuleBasedAccessControl::new(config)?)),
        None => Ok(Arc::new(AllowAllAccessControl)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Principal, PrincipalKind};

    fn identity(user: &str) -> Identity {
        Identity::new(user, Principal::new(PrincipalKind::Password, user))
    }

    #[test]
    fn test_access_denied_display() {
        let denied = AccessDenied::cannot_impersonate_user(&identity("alice"), "bob");
        assert_eq!(
            denied.to_string(),
            "Access Denied: User alice cannot impersonate user bob"
        );

        let denied = AccessDenied::cannot_read_system_information();
        assert_eq!(
            denied.to_string(),
            "Access Denied: Cannot read system information"
        );
        assert_eq!(denied.reason(), "Cannot read system information");
    }

    #[test]
    fn test_allow_all() {
        let access_control = from_config(None).unwrap();
        let alice = identity("alice");

        assert!(access_control
            .check_can_impersonate_user(&alice, "bob")
            .is_ok());
        assert!(access_control
            .check_can_read_system_information(&alice)
            .is_ok());
    }

    #[test]
    fn test_from_config_builds_rules() {
        let config: Config = toml::from_str(
            r#"
            [system_information]
            rules = ["identity.user == 'management-user'"]
            "#,
        )
        .unwrap();

        let access_control = from_config(Some(&config)).unwrap();
        assert!(access_control
            .check_can_read_system_information(&identity("management-user"))
            .is_ok());
        assert!(access_control
            .check_can_read_system_information(&identity("test-user"))
            .is_err());
        assert!(access_control
            .check_can_impersonate_user(&identity("test-user"), "management-user")
            .is_ok());
    }
}
