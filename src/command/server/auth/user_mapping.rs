use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::AuthenticationError;
use crate::configuration::Error as ConfigError;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Translates a raw principal name into the canonical user name.
///
/// The pattern must match the whole principal and contain exactly one capture group; the
/// captured text becomes the user. Without a pattern the principal is used as-is.
#[derive(Clone, Debug)]
pub struct UserMapping {
    pattern: Option<Regex>,
}

impl UserMapping {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let Some(pattern) = &config.pattern else {
            return Ok(Self { pattern: None });
        };

        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|error| {
            ConfigError::UserMapping(format!("Invalid user mapping pattern '{pattern}': {error}"))
        })?;

        // group 0 is the whole match
        if regex.captures_len() != 2 {
            return Err(ConfigError::UserMapping(format!(
                "User mapping pattern '{pattern}' must contain exactly one capture group"
            )));
        }

        Ok(Self {
            pattern: Some(regex),
        })
    }

    pub fn map(&self, principal: &str) -> Result<String, AuthenticationError> {
        let Some(pattern) = &self.pattern else {
            return Ok(principal.to_string());
        };

        let user = pattern
            .captures(principal)
            .and_then(|captures| captures.get(1))
            .map(|user| user.as_str())
            .unwrap_or_default();

        if user.is_empty() {
            debug!("Principal does not match the user mapping pattern");
            return Err(AuthenticationError::InvalidUserMapping);
        }

        Ok(user.to_string())
    }
}
