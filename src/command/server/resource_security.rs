use hyper::http::request::Parts;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::access_control::{self, AccessControl};
use crate::command::server::auth::internal::InternalAuthenticator;
use crate::command::server::auth::{
    Authenticate, Authenticator, AuthenticatorChain, ChallengeContext, Credentials,
    InsecureAuthenticator, OAuth2Service,
};
use crate::command::server::connection::ConnectionInfo;
use crate::command::server::error::Error;
use crate::command::server::management::FixedManagementIdentity;
use crate::configuration::{Configuration, Error as ConfigError};
use crate::identity::{Identity, SecurityCategory};

const HTTP_AUTHENTICATION_DISABLED: &str = "Authentication over HTTP is not enabled";
const INTERNAL_DISABLED: &str = "Internal authentication is not configured";

/// Gate every request goes through before reaching a handler.
pub struct ResourceSecurity {
    https: AuthenticatorChain,
    http: Option<AuthenticatorChain>,
    internal: Option<InternalAuthenticator>,
    management: Option<FixedManagementIdentity>,
    access_control: Arc<dyn AccessControl>,
}

impl ResourceSecurity {
    pub fn new(
        config: &Configuration,
        oauth2: Option<&Arc<OAuth2Service>>,
    ) -> Result<Self, ConfigError> {
        let https = config
            .auth
            .types
            .iter()
            .map(|kind| Authenticator::build(*kind, &config.auth, oauth2))
            .collect::<Result<Vec<_>, _>>()?;

        let http = if config.auth.insecure_over_http_allowed() {
            let insecure = InsecureAuthenticator::new(&config.auth.insecure)?;
            Some(AuthenticatorChain::new(vec![Authenticator::Insecure(
                insecure,
            )]))
        } else {
            None
        };

        Ok(Self {
            https: AuthenticatorChain::new(https),
            http,
            internal: InternalAuthenticator::new(&config.internal_communication),
            management: FixedManagementIdentity::new(&config.management),
            access_control: access_control::from_config(config.access_control.as_ref())?,
        })
    }

    /// Resolves the identity a request acts under, or rejects it.
    ///
    /// `None` is returned for public endpoints only. Failing to authenticate is a 401 carrying
    /// the challenges of the transport's authenticators; an identity that is not allowed to do
    /// what it asks for is a 403.
    #[instrument(skip(self, parts, context), fields(secure = context.secure))]
    pub async fn enforce(
        &self,
        category: SecurityCategory,
        parts: &Parts,
        context: &ChallengeContext,
    ) -> Result<Option<Identity>, Error> {
        match category {
            SecurityCategory::Public => return Ok(None),
            SecurityCategory::InternalOnly => return self.enforce_internal(parts).await.map(Some),
            _ => {}
        }

        if category.is_management() {
            if let Some(management) = &self.management {
                if management.applies(context.secure) {
                    debug!("Granting fixed management identity");
                    return Ok(Some(management.identity()));
                }
            }
        }

        let chain = if context.secure {
            &self.https
        } else {
            self.http
                .as_ref()
                .ok_or_else(|| Error::Forbidden(HTTP_AUTHENTICATION_DISABLED.to_string()))?
        };

        let credentials = Credentials::extract(parts);
        let identity = match chain.authenticate(&credentials).await {
            Ok(identity) => identity,
            Err(failure) => {
                if let Some(connection) = parts.extensions.get::<ConnectionInfo>() {
                    debug!(
                        "Rejecting request from {}: {}",
                        connection.remote_address, failure.message
                    );
                }
                return Err(Error::Unauthorized {
                    message: failure.message,
                    challenges: chain.challenges(context).await,
                })
            }
        };

        let identity = self.impersonate(identity, credentials.asserted_user.as_deref())?;

        if category.is_management() {
            self.access_control
                .check_can_read_system_information(&identity)
                .map_err(|denied| Error::Forbidden(denied.to_string()))?;
        }

        Ok(Some(identity))
    }

    async fn enforce_internal(&self, parts: &Parts) -> Result<Identity, Error> {
        let internal = self
            .internal
            .as_ref()
            .ok_or_else(|| Error::Forbidden(INTERNAL_DISABLED.to_string()))?;

        let credentials = Credentials::extract(parts);
        internal.authenticate(&credentials).await.map_err(|error| {
            debug!("Internal authentication failed: {error}");
            Error::Forbidden(format!("Internal authentication failed: {error}"))
        })
    }

    /// A target matching the user or the raw principal is the caller naming themselves.
    fn impersonate(&self, identity: Identity, target: Option<&str>) -> Result<Identity, Error> {
        let Some(target) = target else {
            return Ok(identity);
        };
        if target == identity.user() || target == identity.principal().name() {
            return Ok(identity);
        }

        self.access_control
            .check_can_impersonate_user(&identity, target)
            .map_err(|denied| Error::Forbidden(denied.to_string()))?;

        debug!("'{}' impersonating '{target}'", identity.user());
        Ok(identity.impersonate(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrincipalKind;
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use base64::Engine;
    use chrono::Utc;
    use hyper::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const BASE: &str = r#"
        [server]
        bind_address = "127.0.0.1"

        [server.https]
        server_certificate_bundle = "testdata/certs/server.crt"
        server_private_key = "testdata/certs/server.key"
    "#;

    fn security(extra: &str) -> ResourceSecurity {
        let config = Configuration::load_from_str(&format!("{BASE}\n{extra}")).unwrap();
        ResourceSecurity::new(&config, None).unwrap()
    }

    fn parts(secure: bool, headers: &[(&str, &str)]) -> Parts {
        let mut request = Request::builder().uri("/v1/query");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let (mut parts, ()) = request.body(()).unwrap().into_parts();
        let remote_address = "127.0.0.1:40000".parse().unwrap();
        parts.extensions.insert(if secure {
            ConnectionInfo::tls(remote_address, None)
        } else {
            ConnectionInfo::plaintext(remote_address)
        });
        parts
    }

    fn context(secure: bool) -> ChallengeContext {
        ChallengeContext {
            base_uri: "https://localhost:8443".to_string(),
            secure,
        }
    }

    async fn enforce(
        security: &ResourceSecurity,
        category: SecurityCategory,
        secure: bool,
        headers: &[(&str, &str)],
    ) -> Result<Option<Identity>, Error> {
        security
            .enforce(category, &parts(secure, headers), &context(secure))
            .await
    }

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", BASE64_STANDARD.encode(format!("{user}:{password}")))
    }

    #[tokio::test]
    async fn test_public_is_never_authenticated() {
        let security = security("");
        let result = enforce(&security, SecurityCategory::Public, false, &[]).await;
        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn test_missing_credentials_is_unauthorized() {
        let security = security("");
        let error = enforce(&security, SecurityCategory::AuthenticatedUser, true, &[])
            .await
            .unwrap_err();

        let Error::Unauthorized {
            message,
            challenges,
        } = error
        else {
            panic!("expected 401, got {error:?}");
        };
        assert_eq!(message, "Unauthorized");
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].header, r#"Basic realm="Coordinator""#);
    }

    #[tokio::test]
    async fn test_insecure_user_header() {
        let security = security("");
        let identity = enforce(
            &security,
            SecurityCategory::AuthenticatedUser,
            false,
            &[("X-Coordinator-User", "alice")],
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(identity.user(), "alice");
        assert_eq!(identity.principal().kind(), PrincipalKind::Trusted);
    }

    #[tokio::test]
    async fn test_http_authentication_disabled() {
        let security = security(
            r#"
            [auth]
            types = ["certificate"]
            "#,
        );

        let error = enforce(
            &security,
            SecurityCategory::AuthenticatedUser,
            false,
            &[("X-Coordinator-User", "alice")],
        )
        .await
        .unwrap_err();
        assert_eq!(
            error,
            Error::Forbidden("Authentication over HTTP is not enabled".to_string())
        );
    }

    #[tokio::test]
    async fn test_insecure_over_tls_requires_configuration() {
        let security = security(
            r#"
            [auth]
            types = ["certificate"]
            allow_insecure_over_http = true
            "#,
        );

        let identity = enforce(
            &security,
            SecurityCategory::AuthenticatedUser,
            false,
            &[("X-Coordinator-User", "alice")],
        )
        .await
        .unwrap();
        assert!(identity.is_some());

        let error = enforce(
            &security,
            SecurityCategory::AuthenticatedUser,
            true,
            &[("X-Coordinator-User", "alice")],
        )
        .await
        .unwrap_err();
        assert_eq!(error.status_code(), hyper::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_management_override_plaintext() {
        let security = security(
            r#"
            [management]
            user = "management-user"

            [access_control.system_information]
            rules = ["identity.user == 'nobody'"]
            "#,
        );

        let identity = enforce(&security, SecurityCategory::ManagementRead, false, &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.user(), "management-user");

        // bad credentials do not block the override
        let identity = enforce(
            &security,
            SecurityCategory::ManagementWrite,
            false,
            &[("Authorization", &basic("alice", "wrong"))],
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(identity.user(), "management-user");

        // never for other categories
        let error = enforce(&security, SecurityCategory::AuthenticatedUser, false, &[])
            .await
            .unwrap_err();
        assert_eq!(error.status_code(), hyper::StatusCode::UNAUTHORIZED);
        let error = enforce(&security, SecurityCategory::InternalOnly, false, &[])
            .await
            .unwrap_err();
        assert_eq!(error.status_code(), hyper::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_management_override_https_only() {
        let security = security(
            r#"
            [management]
            user = "management-user"
            https_only = true
            "#,
        );

        let error = enforce(&security, SecurityCategory::ManagementRead, false, &[])
            .await
            .unwrap_err();
        assert_eq!(error.status_code(), hyper::StatusCode::UNAUTHORIZED);

        let identity = enforce(&security, SecurityCategory::ManagementRead, true, &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.user(), "management-user");
    }

    #[tokio::test]
    async fn test_management_requires_system_information() {
        let security = security(
            r#"
            [access_control.system_information]
            rules = ["identity.user == 'management-user'"]
            "#,
        );

        let error = enforce(
            &security,
            SecurityCategory::ManagementRead,
            false,
            &[("X-Coordinator-User", "test-user")],
        )
        .await
        .unwrap_err();
        assert_eq!(
            error,
            Error::Forbidden("Access Denied: Cannot read system information".to_string())
        );

        let identity = enforce(
            &security,
            SecurityCategory::ManagementRead,
            false,
            &[("X-Coordinator-User", "management-user")],
        )
        .await
        .unwrap();
        assert!(identity.is_some());
    }

    #[tokio::test]
    async fn test_impersonation() {
        let security = security(
            r#"
            [auth.insecure.user_mapping]
            pattern = "(.*)@allowed"

            [access_control.impersonation]
            rules = ["identity.user == 'admin'"]
            "#,
        );
        let request = |user: &str, target: &str| {
            parts(
                false,
                &[
                    ("X-Coordinator-User", target),
                    ("Authorization", &basic(user, "")),
                ],
            )
        };

        let identity = security
            .enforce(
                SecurityCategory::AuthenticatedUser,
                &request("admin@allowed", "bob"),
                &context(false),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.user(), "bob");
        assert_eq!(identity.principal().name(), "admin@allowed");

        let error = security
            .enforce(
                SecurityCategory::AuthenticatedUser,
                &request("alice@allowed", "bob"),
                &context(false),
            )
            .await
            .unwrap_err();
        assert_eq!(
            error,
            Error::Forbidden("Access Denied: User alice cannot impersonate user bob".to_string())
        );

        // naming yourself, by user or by login, is not impersonation
        for target in ["alice", "alice@allowed"] {
            let identity = security
                .enforce(
                    SecurityCategory::AuthenticatedUser,
                    &request("alice@allowed", target),
                    &context(false),
                )
                .await
                .unwrap()
                .unwrap();
            assert_eq!(identity.user(), "alice");
        }
    }

    #[tokio::test]
    async fn test_internal_only() {
        let security = security(
            r#"
            [internal_communication]
            shared_secret = "cluster-secret"
            "#,
        );

        let token = encode(
            &Header::default(),
            &serde_json::json!({ "sub": "worker-1", "exp": Utc::now().timestamp() + 60 }),
            &EncodingKey::from_secret(b"cluster-secret"),
        )
        .unwrap();

        let identity = enforce(
            &security,
            SecurityCategory::InternalOnly,
            false,
            &[("X-Coordinator-Internal-Bearer", &token)],
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(identity.user(), "worker-1");
        assert_eq!(identity.principal().kind(), PrincipalKind::Internal);

        // user-facing schemes never satisfy internal endpoints
        let error = enforce(
            &security,
            SecurityCategory::InternalOnly,
            false,
            &[("X-Coordinator-User", "alice")],
        )
        .await
        .unwrap_err();
        assert_eq!(error.status_code(), hyper::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_internal_only_without_secret() {
        let security = security("");
        let error = enforce(&security, SecurityCategory::InternalOnly, true, &[])
            .await
            .unwrap_err();
        assert_eq!(
            error,
            Error::Forbidden("Internal authentication is not configured".to_string())
        );
    }
}
