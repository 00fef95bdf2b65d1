use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use super::challenge::PendingChallenge;
use crate::configuration::Error as ConfigError;
use crate::secret::Secret;

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct StateClaims {
    #[serde(rename = "cid")]
    pub challenge_id: String,
    #[serde(rename = "nh")]
    pub nonce_hash: String,
    pub ui: bool,
    pub exp: i64,
}

/// Signs the `state` parameter of the authorization redirect so the callback can trust it
/// without any lookup.
pub struct StateSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl StateSigner {
    pub fn new(state_key: &Secret<String>) -> Result<Self, ConfigError> {
        if state_key.is_blank() {
            return Err(ConfigError::Invalid(
                "auth.oauth2.state_key must not be empty".to_string(),
            ));
        }

        let mut hasher = Sha256::new();
        hasher.update(state_key.expose().as_bytes());
        let key = hasher.finalize();

        Ok(Self {
            encoding: EncodingKey::from_secret(&key),
            decoding: DecodingKey::from_secret(&key),
        })
    }

    pub fn sign(&self, challenge: &PendingChallenge, lifetime: Duration) -> Result<String, String> {
        let lifetime = i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX);
        let claims = StateClaims {
            challenge_id: challenge.id.clone(),
            nonce_hash: challenge.nonce_hash.clone(),
            ui: challenge.ui,
            exp: Utc::now().timestamp().saturating_add(lifetime),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| format!("Failed to sign OAuth2 state: {e}"))
    }

    pub fn verify(&self, state: &str) -> Option<StateClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        match decode::<StateClaims>(state, &self.decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(error) => {
                debug!("Rejected OAuth2 state: {error}");
                None
            }
        }
    }
}
