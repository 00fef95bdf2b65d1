use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use super::{user_mapping, AuthenticationError, Authenticate, Credentials, UserMapping};
use crate::configuration::Error as ConfigError;
use crate::identity::{Identity, Principal, PrincipalKind};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub user_mapping: user_mapping::Config,
}

/// Client certificate authentication.
///
/// Note: chain validation (expiry, CA trust) happens in the TLS layer during the handshake.
/// This authenticator only reads the subject of a certificate the transport already verified.
pub struct CertificateAuthenticator {
    user_mapping: UserMapping,
}

impl CertificateAuthenticator {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            user_mapping: UserMapping::new(&config.user_mapping)?,
        })
    }
}

#[async_trait]
impl Authenticate for CertificateAuthenticator {
    #[instrument(skip(self, credentials))]
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, AuthenticationError> {
        let Some(peer_certificate) = &credentials.certificate else {
            return Err(AuthenticationError::NoCertificate);
        };

        let (_, certificate) = X509Certificate::from_der(&peer_certificate.0).map_err(|e| {
            debug!("Failed to parse client certificate: {e:?}");
            AuthenticationError::InvalidCredential("Malformed client certificate".to_string())
        })?;

        let subject = certificate.subject();
        let Some(common_name) = subject
            .iter_common_name()
            .find_map(|cn| cn.as_str().ok().map(String::from))
        else {
            debug!("Client certificate has no common name");
            return Err(AuthenticationError::InvalidUserMapping);
        };

        let organizations = subject
            .iter_organization()
            .filter_map(|o| o.as_str().ok().map(String::from))
            .collect::<Vec<_>>();

        let user = self.user_mapping.map(&common_name)?;
        Ok(
            Identity::new(user, Principal::new(PrincipalKind::Certificate, subject.to_string()))
                .with_groups(organizations),
        )
    }
}
