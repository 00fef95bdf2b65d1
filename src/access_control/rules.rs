//! CEL rule evaluation for the two capability checks.
//!
//! Each capability carries a `default_allow` flag and a list of rules:
//! - **Default Allow**: access is granted unless a rule evaluates to `true` (deny rules)
//! - **Default Deny**: access is denied unless a rule evaluates to `true` (allow rules)
//!
//! Rules see `identity` (`user`, `principal`, `groups`) and, for impersonation,
//! `target_user`. A capability without a configured section is always granted.

use cel_interpreter::{Context, Program, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AccessControl, AccessDenied, Config};
use crate::configuration::Error as ConfigError;
use crate::identity::Identity;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub default_allow: bool,
    #[serde(default)]
    pub rules: Vec<String>,
}

struct Policy {
    name: &'static str,
    default_allow: bool,
    rules: Vec<Program>,
}

#[derive(Serialize)]
struct PolicyIdentity<'a> {
    user: &'a str,
    principal: &'a str,
    groups: Vec<&'a str>,
}

impl<'a> From<&'a Identity> for PolicyIdentity<'a> {
    fn from(identity: &'a Identity) -> Self {
        Self {
            user: identity.user(),
            principal: identity.principal().name(),
            groups: identity.groups().iter().map(String::as_str).collect(),
        }
    }
}

impl Policy {
    fn new(name: &'static str, config: &PolicyConfig) -> Result<Self, ConfigError> {
        let mut compiled_rules = Vec::new();

        for (index, rule) in config.rules.iter().enumerate() {
            match Program::compile(rule) {
                Ok(program) => compiled_rules.push(program),
                Err(e) => {
                    return Err(ConfigError::PolicyCompilation(format!(
                        "Failed to compile {name} rule #{} '{}': {}",
                        index + 1,
                        rule,
                        e
                    )));
                }
            }
        }

        Ok(Self {
            name,
            default_allow: config.default_allow,
            rules: compiled_rules,
        })
    }

    fn evaluate(&self, identity: &Identity, target_user: Option<&str>) -> bool {
        if self.rules.is_empty() {
            return self.default_allow;
        }

        let context = match Self::build_context(identity, target_user) {
            Ok(context) => context,
            Err(error) => {
                warn!("Unable to build {} policy context: {error}", self.name);
                return false;
            }
        };

        if self.default_allow {
            for (index, rule) in self.rules.iter().enumerate() {
                let rule_index = index + 1;
                match rule.execute(&context) {
                    Ok(Value::Bool(true)) => {
                        debug!("{} deny rule {rule_index} matched", self.name);
                        return false;
                    }
                    Ok(Value::Bool(false)) => {}
                    Ok(value) => {
                        warn!("{} deny rule {rule_index} returned non-boolean value: {value:?}, treating as deny", self.name);
                        return false;
                    }
                    Err(e) => {
                        warn!(
                            "{} deny rule {rule_index} evaluation failed: {e}, skipping rule",
                            self.name
                        );
                    }
                }
            }
            true
        } else {
            for (index, rule) in self.rules.iter().enumerate() {
                let rule_index = index + 1;
                match rule.execute(&context) {
                    Ok(Value::Bool(true)) => {
                        debug!("{} allow rule {rule_index} matched", self.name);
                        return true;
                    }
                    Ok(Value::Bool(false)) => {}
                    Ok(value) => {
                        warn!("{} allow rule {rule_index} returned non-boolean value: {value:?}, skipping rule", self.name);
                    }
                    Err(e) => {
                        warn!(
                            "{} allow rule {rule_index} evaluation failed: {e}, skipping rule",
                            self.name
                        );
                    }
                }
            }
            false
        }
    }

    fn build_context<'a>(
        identity: &'a Identity,
        target_user: Option<&'a str>,
    ) -> Result<Context<'a>, String> {
        let mut context = Context::default();
        context
            .add_variable("identity", PolicyIdentity::from(identity))
            .map_err(|e| e.to_string())?;
        context
            .add_variable("target_user", target_user.unwrap_or_default())
            .map_err(|e| e.to_string())?;
        Ok(context)
    }
}

pub struct RuleBasedAccessControl {
    impersonation: Option<Policy>,
    system_information: Option<Policy>,
}

impl RuleBasedAccessControl {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let impersonation = config
            .impersonation
            .as_ref()
            .map(|policy| Policy::new("impersonation", policy))
            .transpose()?;
        let system_information = config
            .system_information
            .as_ref()
            .map(|policy| Policy::new("system information", policy))
            .transpose()?;

        Ok(Self {
            impersonation,
            system_information,
        })
    }
}

impl AccessControl for RuleBasedAccessControl {
    fn check_can_impersonate_user(
        &self,
        identity: &Identity,
        target_user: &str,
    ) -> Result<(), AccessDenied> {
        match &self.impersonation {
            Some(policy) if !policy.evaluate(identity, Some(target_user)) => Err(
                AccessDenied::cannot_impersonate_user(identity, target_user),
            ),
            _ => Ok(()),
        }
    }

    fn check_can_read_system_information(&self, identity: &Identity) -> Result<(), AccessDenied> {
        match &self.system_information {
            Some(policy) if !policy.evaluate(identity, None) => {
                Err(AccessDenied::cannot_read_system_information())
            }
            _ => Ok(()),
        }
    }
}
