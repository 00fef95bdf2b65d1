use hyper::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::info;

use crate::command::server::auth::{AuthenticationType, ChallengeContext, OAuth2Service};
use crate::command::server::connection::ConnectionInfo;
use crate::command::server::error::Error;
use crate::command::server::request_ext::HeaderExt;
use crate::command::server::resource_security::ResourceSecurity;
use crate::configuration::{self, Configuration};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Active,
    ShuttingDown,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeState::Active => write!(f, "ACTIVE"),
            NodeState::ShuttingDown => write!(f, "SHUTTING_DOWN"),
        }
    }
}

/// Accepts the state name, bare or as a JSON string.
impl FromStr for NodeState {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().trim_matches('"') {
            "ACTIVE" => Ok(NodeState::Active),
            "SHUTTING_DOWN" => Ok(NodeState::ShuttingDown),
            other => Err(Error::BadRequest(format!("Invalid node state: {other}"))),
        }
    }
}

pub struct NodeInfo {
    pub node_id: String,
    pub environment: String,
    pub version: &'static str,
    pub started_at: Instant,
}

pub struct ServerContext {
    pub node: NodeInfo,
    pub security: ResourceSecurity,
    pub oauth2: Option<Arc<OAuth2Service>>,
    pub web_ui_enabled: bool,
    process_forwarded: bool,
    state: RwLock<NodeState>,
}

impl ServerContext {
    pub fn new(config: &Configuration) -> Result<Self, configuration::Error> {
        let oauth2 = match &config.auth.oauth2 {
            Some(oauth2) if config.auth.types.contains(&AuthenticationType::OAuth2) => Some(
                Arc::new(OAuth2Service::new(oauth2, config.web_ui.enabled)?),
            ),
            _ => None,
        };

        Self::with_oauth2(config, oauth2)
    }

    pub fn with_oauth2(
        config: &Configuration,
        oauth2: Option<Arc<OAuth2Service>>,
    ) -> Result<Self, configuration::Error> {
        let security = ResourceSecurity::new(config, oauth2.as_ref())?;

        Ok(Self {
            node: NodeInfo {
                node_id: config.server.node_id.clone(),
                environment: config.server.environment.clone(),
                version: env!("CARGO_PKG_VERSION"),
                started_at: Instant::now(),
            },
            security,
            oauth2,
            web_ui_enabled: config.web_ui.enabled,
            process_forwarded: config.server.process_forwarded,
            state: RwLock::new(NodeState::Active),
        })
    }

    /// Where challenges and redirects built for this request must point.
    pub fn challenge_context(&self, parts: &Parts) -> ChallengeContext {
        let secure = parts
            .extensions
            .get::<ConnectionInfo>()
            .is_some_and(|connection| connection.secure);

        ChallengeContext {
            base_uri: parts.external_base_uri(secure, self.process_forwarded),
            secure,
        }
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    /// A node that started shutting down never becomes active again.
    pub async fn set_state(&self, target: NodeState) -> Result<NodeState, Error> {
        let mut state = self.state.write().await;
        if *state == NodeState::ShuttingDown && target == NodeState::Active {
            return Err(Error::BadRequest(
                "Cannot restore a shutting down node to ACTIVE".to_string(),
            ));
        }

        if *state != target {
            info!("Node state changed from {} to {target}", *state);
            *state = target;
        }
        Ok(target)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use hyper::Request;

    pub fn create_test_server_context(extra: &str) -> ServerContext {
        let config = Configuration::load_from_str(&format!(
            r#"
            [server]
            bind_address = "127.0.0.1"
            node_id = "test-node"

            {extra}
            "#
        ))
        .unwrap();

        ServerContext::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let context = create_test_server_context("");
        assert_eq!(context.state().await, NodeState::Active);

        assert_eq!(
            context.set_state(NodeState::ShuttingDown).await,
            Ok(NodeState::ShuttingDown)
        );
        assert_eq!(context.state().await, NodeState::ShuttingDown);

        assert!(context.set_state(NodeState::Active).await.is_err());
        assert_eq!(context.state().await, NodeState::ShuttingDown);
    }

    #[test]
    fn test_node_state_serialization() {
        assert_eq!(
            serde_json::to_string(&NodeState::ShuttingDown).unwrap(),
            r#""SHUTTING_DOWN""#
        );
        assert_eq!(
            serde_json::from_str::<NodeState>(r#""ACTIVE""#).unwrap(),
            NodeState::Active
        );
    }

    #[test]
    fn test_parse_node_state() {
        assert_eq!("ACTIVE".parse::<NodeState>(), Ok(NodeState::Active));
        assert_eq!(
            "\"SHUTTING_DOWN\"\n".parse::<NodeState>(),
            Ok(NodeState::ShuttingDown)
        );
        assert!("INACTIVE".parse::<NodeState>().is_err());
    }

    #[test]
    fn test_challenge_context() {
        let context = create_test_server_context("");

        let (mut parts, ()) = Request::builder()
            .uri("/v1/query")
            .header("Host", "coordinator:8443")
            .body(())
            .unwrap()
            .into_parts();
        parts.extensions.insert(ConnectionInfo::tls(
            "127.0.0.1:40000".parse().unwrap(),
            None,
        ));

        let challenge = context.challenge_context(&parts);
        assert!(challenge.secure);
        assert_eq!(challenge.base_uri, "https://coordinator:8443");
    }

    #[test]
    fn test_forwarded_headers_ignored_by_default() {
        let context = create_test_server_context("");

        let (parts, ()) = Request::builder()
            .uri("/v1/query")
            .header("Host", "coordinator:8080")
            .header("X-Forwarded-Proto", "https")
            .body(())
            .unwrap()
            .into_parts();

        let challenge = context.challenge_context(&parts);
        assert!(!challenge.secure);
        assert_eq!(challenge.base_uri, "http://coordinator:8080");
    }
}
