use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use super::key_store::{KeyFamily, VerificationKey};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "RSA")]
    Rsa {
        #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
        key_use: Option<String>,
        kid: Option<String>,
        alg: Option<String>,
        n: String,
        e: String,
    },
    #[serde(rename = "EC")]
    Ec {
        #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
        key_use: Option<String>,
        kid: Option<String>,
        alg: Option<String>,
        x: String,
        y: String,
    },
    #[serde(rename = "oct")]
    Oct {
        #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
        key_use: Option<String>,
        kid: Option<String>,
        alg: Option<String>,
        k: String,
    },
}

impl Jwk {
    pub fn kid(&self) -> Option<&str> {
        match self {
            Jwk::Rsa { kid, .. } | Jwk::Ec { kid, .. } | Jwk::Oct { kid, .. } => kid.as_deref(),
        }
    }

    fn algorithm(&self) -> Result<Option<Algorithm>, String> {
        let alg = match self {
            Jwk::Rsa { alg, .. } | Jwk::Ec { alg, .. } | Jwk::Oct { alg, .. } => alg,
        };

        alg.as_deref()
            .map(Algorithm::from_str)
            .transpose()
            .map_err(|e| format!("Unsupported JWK algorithm {alg:?}: {e}"))
    }

    fn is_signing_key(&self) -> bool {
        let key_use = match self {
            Jwk::Rsa { key_use, .. } | Jwk::Ec { key_use, .. } | Jwk::Oct { key_use, .. } => {
                key_use
            }
        };
        key_use.as_deref().is_none_or(|key_use| key_use == "sig")
    }

    pub fn to_verification_key(&self) -> Result<VerificationKey, String> {
        if !self.is_signing_key() {
            return Err(format!("JWK {:?} is not a signing key", self.kid()));
        }

        let algorithm = self.algorithm()?;
        let (key, family) = match self {
            Jwk::Rsa { n, e, kid, .. } => {
                debug!("Creating RSA DecodingKey from JWK with alg={algorithm:?}, kid={kid:?}");
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| format!("Failed to create RSA key: {e}"))?;
                (key, KeyFamily::Rsa)
            }
            Jwk::Ec { x, y, kid, .. } => {
                debug!("Creating EC DecodingKey from JWK with alg={algorithm:?}, kid={kid:?}");
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|e| format!("Failed to create EC key: {e}"))?;
                (key, KeyFamily::Ec)
            }
            Jwk::Oct { k, kid, .. } => {
                debug!("Creating HMAC DecodingKey from JWK with alg={algorithm:?}, kid={kid:?}");
                let secret = URL_SAFE_NO_PAD
                    .decode(k.trim_end_matches('='))
                    .map_err(|e| format!("Failed to decode HMAC key: {e}"))?;
                (DecodingKey::from_secret(&secret), KeyFamily::Hmac)
            }
        };

        if let Some(algorithm) = algorithm {
            if KeyFamily::of(algorithm) != family {
                return Err(format!(
                    "JWK algorithm {algorithm:?} does not match key type {family:?}"
                ));
            }
        }

        Ok(VerificationKey::new(key, family, algorithm))
    }
}
