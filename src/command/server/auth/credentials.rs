use hyper::http::request::Parts;

use crate::command::server::connection::{ConnectionInfo, PeerCertificate};
use crate::command::server::request_ext::HeaderExt;
use crate::secret::Secret;

/// Caller-asserted user, read by the insecure authenticator and as impersonation target.
pub const USER_HEADER: &str = "x-coordinator-user";
/// Node-to-node bearer token.
pub const INTERNAL_BEARER_HEADER: &str = "x-coordinator-internal-bearer";
pub const UI_TOKEN_COOKIE: &str = "coordinator_ui_token";

#[derive(Debug)]
pub struct BasicCredentials {
    pub user: String,
    pub password: Secret<String>,
}

/// Everything a request carries that an authenticator may look at.
///
/// Extraction never fails: a missing or malformed piece is simply absent.
#[derive(Debug, Default)]
pub struct Credentials {
    pub basic: Option<BasicCredentials>,
    pub bearer: Option<Secret<String>>,
    pub ui_token: Option<Secret<String>>,
    pub certificate: Option<PeerCertificate>,
    pub asserted_user: Option<String>,
    pub internal_bearer: Option<Secret<String>>,
}

impl Credentials {
    pub fn extract(parts: &Parts) -> Self {
        let basic = parts
            .basic_auth()
            .map(|(user, password)| BasicCredentials {
                user,
                password: Secret::new(password),
            });

        let path = parts.uri.path();
        let ui_token = if path == "/ui" || path.starts_with("/ui/") {
            parts
                .cookie(UI_TOKEN_COOKIE)
                .filter(|token| !token.is_empty())
                .map(Secret::new)
        } else {
            None
        };

        let certificate = parts
            .extensions
            .get::<ConnectionInfo>()
            .and_then(|connection| connection.peer_certificate.clone());

        Self {
            basic,
            bearer: parts.bearer_token().map(Secret::new),
            ui_token,
            certificate,
            asserted_user: parts
                .get_header(USER_HEADER)
                .map(|user| user.trim().to_string())
                .filter(|user| !user.is_empty()),
            internal_bearer: parts
                .get_header(INTERNAL_BEARER_HEADER)
                .filter(|token| !token.is_empty())
                .map(Secret::new),
        }
    }

    /// The bearer token, falling back to the UI session cookie.
    pub fn token(&self) -> Option<&str> {
        self.bearer
            .as_ref()
            .or(self.ui_token.as_ref())
            .map(|token| token.expose().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use base64::Engine;
    use hyper::Request;
    use std::sync::Arc;

    fn build_parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut request = Request::builder().uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let (parts, ()) = request.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn test_no_credentials() {
        let credentials = Credentials::extract(&build_parts("/v1/query", &[]));

        assert!(credentials.basic.is_none());
        assert!(credentials.bearer.is_none());
        assert!(credentials.ui_token.is_none());
        assert!(credentials.certificate.is_none());
        assert!(credentials.asserted_user.is_none());
        assert!(credentials.internal_bearer.is_none());
        assert!(credentials.token().is_none());
    }

    #[test]
    fn test_extract_basic_and_user_header() {
        let encoded = BASE64_STANDARD.encode("alice:secret");
        let parts = build_parts(
            "/v1/query",
            &[
                ("Authorization", &format!("Basic {encoded}")),
                ("X-Coordinator-User", "bob"),
            ],
        );

        let credentials = Credentials::extract(&parts);
        let basic = credentials.basic.unwrap();
        assert_eq!(basic.user, "alice");
        assert_eq!(basic.password.expose(), "secret");
        assert_eq!(credentials.asserted_user.as_deref(), Some("bob"));
    }

    #[test]
    fn test_ui_cookie_only_on_ui_paths() {
        let headers = [("Cookie", "coordinator_ui_token=session-token")];

        let credentials = Credentials::extract(&build_parts("/ui/index.html", &headers));
        assert_eq!(credentials.token(), Some("session-token"));

        let credentials = Credentials::extract(&build_parts("/v1/query", &headers));
        assert!(credentials.ui_token.is_none());
        assert!(credentials.token().is_none());

        let credentials = Credentials::extract(&build_parts("/uiextra", &headers));
        assert!(credentials.ui_token.is_none());
    }

    #[test]
    fn test_bearer_preferred_over_cookie() {
        let parts = build_parts(
            "/ui/",
            &[
                ("Cookie", "coordinator_ui_token=cookie-token"),
                ("Authorization", "Bearer header-token"),
            ],
        );

        let credentials = Credentials::extract(&parts);
        assert_eq!(credentials.token(), Some("header-token"));
    }

    #[test]
    fn test_peer_certificate_from_connection() {
        let mut parts = build_parts("/v1/query", &[]);
        parts.extensions.insert(ConnectionInfo {
            remote_address: "127.0.0.1:1234".parse().unwrap(),
            secure: true,
            peer_certificate: Some(PeerCertificate(Arc::new(vec![1, 2, 3]))),
        });

        let credentials = Credentials::extract(&parts);
        assert_eq!(credentials.certificate.unwrap().0.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_internal_bearer() {
        let parts = build_parts("/v1/task", &[("X-Coordinator-Internal-Bearer", "abc")]);
        let credentials = Credentials::extract(&parts);

        assert_eq!(
            credentials.internal_bearer.as_ref().map(|t| t.expose().as_str()),
            Some("abc")
        );
        assert!(credentials.bearer.is_none());
    }
}
