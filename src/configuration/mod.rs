use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use tracing::warn;

mod error;

use crate::access_control;
use crate::command::server::auth::{self, internal};
use crate::command::server::management;
pub use error::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub server: ServerConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub auth: auth::Config,
    #[serde(default)]
    pub management: management::Config,
    #[serde(default)]
    pub internal_communication: internal::Config,
    #[serde(default)]
    pub access_control: Option<access_control::Config>,
    #[serde(default)]
    pub web_ui: WebUiConfig,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
    #[serde(default)]
    pub process_forwarded: bool,
    #[serde(default = "ServerConfig::default_node_id")]
    pub node_id: String,
    #[serde(default = "ServerConfig::default_environment")]
    pub environment: String,
    pub https: Option<ServerTlsConfig>,
}

impl ServerConfig {
    fn default_port() -> u16 {
        8080
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }

    fn default_node_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn default_environment() -> String {
        "production".to_string()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerTlsConfig {
    #[serde(default = "ServerTlsConfig::default_port")]
    pub port: u16,
    pub server_certificate_bundle: String,
    pub server_private_key: String,
    pub client_ca_bundle: Option<String>,
}

impl ServerTlsConfig {
    fn default_port() -> u16 {
        8443
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "GlobalConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            max_concurrent_requests: GlobalConfig::default_max_concurrent_requests(),
        }
    }
}

impl GlobalConfig {
    fn default_max_concurrent_requests() -> usize {
        4
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WebUiConfig {
    #[serde(default = "WebUiConfig::default_enabled")]
    pub enabled: bool,
}

impl Default for WebUiConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
        }
    }
}

impl WebUiConfig {
    fn default_enabled() -> bool {
        true
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice).map_err(|e| {
            println!("Configuration file format error:");
            println!("{e}");
            Error::ConfigurationFileFormat(e.to_string())
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        self.auth.validate(self.server.https.as_ref())?;

        if let Some(access_control) = &self.access_control {
            access_control::RuleBasedAccessControl::new(access_control)?;
        }

        if self.server.https.is_none() && !self.auth.insecure_over_http_allowed() {
            warn!("No HTTPS listener configured and authentication over HTTP is disabled: only public endpoints will be reachable");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::server::auth::AuthenticationType;

    #[test]
    fn test_load_minimal_config() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"
        "#;

        let config = Configuration::load_from_str(config).unwrap();

        assert_eq!(config.global.max_concurrent_requests, 4);

        let bind_address = config.server.bind_address.to_string();
        assert_eq!(bind_address, "0.0.0.0".to_string());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.query_timeout, 3600);
        assert_eq!(config.server.query_timeout_grace_period, 60);
        assert!(!config.server.process_forwarded);
        assert!(!config.server.node_id.is_empty());
        assert_eq!(config.server.environment, "production");
        assert!(config.server.https.is_none());

        assert_eq!(config.auth.types, vec![AuthenticationType::Insecure]);
        assert!(config.auth.insecure_over_http_allowed());
        assert!(config.management.user.is_none());
        assert!(!config.management.https_only);
        assert!(config.internal_communication.shared_secret.is_none());
        assert!(config.access_control.is_none());
        assert!(config.web_ui.enabled);
        assert!(config.observability.is_none());
    }

    #[test]
    fn test_load_https_section() {
        let config = r#"
        [server]
        bind_address = "127.0.0.1"
        node_id = "coordinator-1"

        [server.https]
        server_certificate_bundle = "/etc/coordinator/server.pem"
        server_private_key = "/etc/coordinator/server.key"
        client_ca_bundle = "/etc/coordinator/ca.pem"
        "#;

        let config = Configuration::load_from_str(config).unwrap();
        let https = config.server.https.unwrap();
        assert_eq!(https.port, 8443);
        assert_eq!(https.client_ca_bundle.as_deref(), Some("/etc/coordinator/ca.pem"));
        assert_eq!(config.server.node_id, "coordinator-1");
    }

    #[test]
    fn test_insecure_over_http_defaults_off_with_secure_types() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [server.https]
        server_certificate_bundle = "server.pem"
        server_private_key = "server.key"

        [auth]
        types = ["password", "insecure"]

        [[auth.password.authenticators]]
        name = "file"
        users = []
        "#;

        let config = Configuration::load_from_str(config).unwrap();
        assert_eq!(
            config.auth.types,
            vec![AuthenticationType::Password, AuthenticationType::Insecure]
        );
        assert!(!config.auth.insecure_over_http_allowed());
    }

    #[test]
    fn test_reject_user_mapping_without_capture_group() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [auth.insecure.user_mapping]
        pattern = ".*@example.com"
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::UserMapping(_))));
    }

    #[test]
    fn test_reject_jwt_without_key_source() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [server.https]
        server_certificate_bundle = "server.pem"
        server_private_key = "server.key"

        [auth]
        types = ["jwt"]

        [auth.jwt]
        principal_field = "sub"
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_reject_zero_http_timeout() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [server.https]
        server_certificate_bundle = "server.pem"
        server_private_key = "server.key"

        [auth]
        types = ["jwt"]

        [auth.jwt]
        jwks_url = "https://issuer.example.com/jwks"
        http_timeout = 0
        "#;

        let result = Configuration::load_from_str(config);
        assert!(
            matches!(result, Err(Error::Invalid(ref message)) if message == "auth.jwt.http_timeout must be positive")
        );
    }

    #[test]
    fn test_reject_oauth2_without_https() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [auth]
        types = ["oauth2"]

        [auth.oauth2]
        issuer = "https://issuer.example.com"
        auth_url = "https://issuer.example.com/authorize"
        token_url = "https://issuer.example.com/token"
        jwks_url = "https://issuer.example.com/jwks"
        client_id = "coordinator"
        client_secret = "secret"
        state_key = "state-key"
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_reject_invalid_access_control_rule() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [access_control.system_information]
        rules = ["identity.user == "]
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::PolicyCompilation(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Configuration::load("/nonexistent/coordinator/config.toml");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [server]
            bind_address = "0.0.0.0"
            port = 9090

            [web_ui]
            enabled = false
            "#,
        )
        .unwrap();

        let config = Configuration::load(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(!config.web_ui.enabled);
    }
}
