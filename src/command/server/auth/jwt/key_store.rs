use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use super::jwk::Jwk;
use crate::command::server::auth::AuthenticationError;
use crate::configuration::Error as ConfigError;
use crate::metrics_provider::JWKS_FETCHES;

const FETCH_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Deserialize)]
pub struct JwksConfig {
    #[serde(default = "JwksConfig::default_refresh_interval")]
    pub jwks_refresh_interval: u64,
    #[serde(default = "JwksConfig::default_min_refresh_interval")]
    pub jwks_min_refresh_interval: u64,
    #[serde(default = "JwksConfig::default_max_stale")]
    pub jwks_max_stale: u64,
    #[serde(default = "JwksConfig::default_http_timeout")]
    pub http_timeout: u64,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            jwks_refresh_interval: Self::default_refresh_interval(),
            jwks_min_refresh_interval: Self::default_min_refresh_interval(),
            jwks_max_stale: Self::default_max_stale(),
            http_timeout: Self::default_http_timeout(),
        }
    }
}

impl JwksConfig {
    fn default_refresh_interval() -> u64 {
        3600
    }

    fn default_min_refresh_interval() -> u64 {
        10
    }

    fn default_max_stale() -> u64 {
        86400
    }

    fn default_http_timeout() -> u64 {
        30
    }

    pub fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.http_timeout == 0 {
            return Err(ConfigError::Invalid(format!(
                "{section}.http_timeout must be positive"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFamily {
    Hmac,
    Rsa,
    Ec,
    Ed,
}

impl KeyFamily {
    pub fn of(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Hmac,
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => KeyFamily::Rsa,
            Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
            Algorithm::EdDSA => KeyFamily::Ed,
        }
    }
}

/// A decoding key together with the algorithms it may verify.
#[derive(Clone)]
pub struct VerificationKey {
    key: DecodingKey,
    family: KeyFamily,
    algorithm: Option<Algorithm>,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    pub fn new(key: DecodingKey, family: KeyFamily, algorithm: Option<Algorithm>) -> Self {
        Self {
            key,
            family,
            algorithm,
        }
    }

    /// PEM content is tried as RSA, then EC, then Ed25519. Anything else is an HMAC secret
    /// (trailing line breaks are not part of the secret).
    pub fn load(content: &str) -> Result<Self, ConfigError> {
        if content.contains("-----BEGIN") {
            let pem = content.as_bytes();
            if let Ok(key) = DecodingKey::from_rsa_pem(pem) {
                return Ok(Self::new(key, KeyFamily::Rsa, None));
            }
            if let Ok(key) = DecodingKey::from_ec_pem(pem) {
                return Ok(Self::new(key, KeyFamily::Ec, None));
            }
            if let Ok(key) = DecodingKey::from_ed_pem(pem) {
                return Ok(Self::new(key, KeyFamily::Ed, None));
            }
            return Err(ConfigError::KeyMaterial(
                "Unsupported PEM verification key".to_string(),
            ));
        }

        let secret = content.trim_end_matches(['\r', '\n']);
        if secret.is_empty() {
            return Err(ConfigError::KeyMaterial("Empty HMAC secret".to_string()));
        }
        Ok(Self::new(
            DecodingKey::from_secret(secret.as_bytes()),
            KeyFamily::Hmac,
            None,
        ))
    }

    pub fn accepts(&self, algorithm: Algorithm) -> bool {
        KeyFamily::of(algorithm) == self.family
            && self.algorithm.is_none_or(|expected| expected == algorithm)
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

pub enum KeySource {
    Static(VerificationKey),
    Jwks(Arc<JwksKeyStore>),
}

impl KeySource {
    pub async fn resolve(
        &self,
        kid: Option<&str>,
        algorithm: Algorithm,
    ) -> Result<VerificationKey, AuthenticationError> {
        match self {
            KeySource::Static(key) => select(key, algorithm),
            KeySource::Jwks(store) => store.resolve(kid, algorithm).await,
        }
    }
}

fn select(key: &VerificationKey, algorithm: Algorithm) -> Result<VerificationKey, AuthenticationError> {
    if key.accepts(algorithm) {
        Ok(key.clone())
    } else {
        debug!("Key does not accept algorithm {algorithm:?}");
        Err(AuthenticationError::InvalidToken)
    }
}

#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<Value>,
}

#[derive(Default)]
struct Snapshot {
    keys: Vec<(Option<String>, VerificationKey)>,
    fetched_at: Option<Instant>,
    attempted_at: Option<Instant>,
    generation: u64,
}

impl Snapshot {
    fn find(&self, kid: Option<&str>) -> Option<&VerificationKey> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|(key_id, _)| key_id.as_deref() == Some(kid))
                .map(|(_, key)| key),
            None if self.keys.len() == 1 => self.keys.first().map(|(_, key)| key),
            None => None,
        }
    }
}

/// Signing keys published at a JWKS URL.
///
/// Lookups are served from the cached document while it is fresh. An unknown `kid` or an
/// expired document triggers a refresh; concurrent callers share a single fetch. Refreshes are
/// rate limited, and a failed refresh keeps serving the previous document until it exceeds the
/// maximum staleness.
pub struct JwksKeyStore {
    url: String,
    client: reqwest::Client,
    refresh_interval: Duration,
    min_refresh_interval: Duration,
    max_stale: Duration,
    snapshot: RwLock<Snapshot>,
    refresh_lock: Mutex<()>,
}

impl JwksKeyStore {
    pub fn new(url: &str, config: &JwksConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout))
            .build()?;

        Ok(Self {
            url: url.to_string(),
            client,
            refresh_interval: Duration::from_secs(config.jwks_refresh_interval),
            min_refresh_interval: Duration::from_secs(config.jwks_min_refresh_interval),
            max_stale: Duration::from_secs(config.jwks_max_stale),
            snapshot: RwLock::new(Snapshot::default()),
            refresh_lock: Mutex::new(()),
        })
    }

    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn resolve(
        &self,
        kid: Option<&str>,
        algorithm: Algorithm,
    ) -> Result<VerificationKey, AuthenticationError> {
        let observed_generation = {
            let snapshot = self.snapshot.read().await;
            let fresh = snapshot
                .fetched_at
                .is_some_and(|fetched_at| fetched_at.elapsed() < self.refresh_interval);

            if fresh {
                if let Some(key) = snapshot.find(kid) {
                    return select(key, algorithm);
                }
                if self.recently_attempted(&snapshot) {
                    debug!("Unknown key id, refresh is rate limited");
                    return Err(AuthenticationError::InvalidToken);
                }
            }
            snapshot.generation
        };

        self.refresh(observed_generation).await;

        let snapshot = self.snapshot.read().await;
        let usable = snapshot
            .fetched_at
            .is_some_and(|fetched_at| fetched_at.elapsed() < self.max_stale);
        if !usable {
            warn!("No usable JWKS document");
            return Err(AuthenticationError::UpstreamUnavailable);
        }

        match snapshot.find(kid) {
            Some(key) => select(key, algorithm),
            None => {
                debug!("Unknown key id after refresh");
                Err(AuthenticationError::InvalidToken)
            }
        }
    }

    fn recently_attempted(&self, snapshot: &Snapshot) -> bool {
        snapshot
            .attempted_at
            .is_some_and(|attempted_at| attempted_at.elapsed() < self.min_refresh_interval)
    }

    async fn refresh(&self, observed_generation: u64) {
        let _guard = self.refresh_lock.lock().await;

        {
            let snapshot = self.snapshot.read().await;
            // another caller refreshed while we waited for the lock
            if snapshot.generation != observed_generation || self.recently_attempted(&snapshot) {
                return;
            }
        }

        let result = self.fetch().await;

        let mut snapshot = self.snapshot.write().await;
        let now = Instant::now();
        snapshot.attempted_at = Some(now);
        snapshot.generation += 1;
        match result {
            Ok(keys) => {
                info!("Loaded {} keys from JWKS", keys.len());
                snapshot.keys = keys;
                snapshot.fetched_at = Some(now);
            }
            Err(error) => warn!("Failed to refresh JWKS from {}: {error}", self.url),
        }
    }

    async fn fetch(&self) -> Result<Vec<(Option<String>, VerificationKey)>, String> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = String::new();

        for attempt in 1..=FETCH_ATTEMPTS {
            match self.fetch_once().await {
                Ok(keys) => {
                    JWKS_FETCHES.with_label_values(&["success"]).inc();
                    return Ok(keys);
                }
                Err(error) => {
                    debug!("JWKS fetch attempt {attempt}/{FETCH_ATTEMPTS} failed: {error}");
                    last_error = error;
                }
            }

            if attempt < FETCH_ATTEMPTS {
                sleep(backoff).await;
                backoff *= 2;
            }
        }

        JWKS_FETCHES.with_label_values(&["failure"]).inc();
        Err(last_error)
    }

    async fn fetch_once(&self) -> Result<Vec<(Option<String>, VerificationKey)>, String> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Unexpected status {status}"));
        }

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| format!("Invalid JWKS document: {e}"))?;

        let keys = document
            .keys
            .into_iter()
            .filter_map(|value| {
                let jwk = match serde_json::from_value::<Jwk>(value) {
                    Ok(jwk) => jwk,
                    Err(error) => {
                        debug!("Skipping unsupported JWK: {error}");
                        return None;
                    }
                };
                match jwk.to_verification_key() {
                    Ok(key) => Some((jwk.kid().map(String::from), key)),
                    Err(error) => {
                        debug!("Skipping JWK: {error}");
                        None
                    }
                }
            })
            .collect();

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    static JWKS: &str = include_str!("../../../../../testdata/jwks.json");
    static PUBLIC_KEY: &str = include_str!("../../../../../testdata/jwk_public_key.pem");

    fn jwks_config(refresh: u64, min_refresh: u64, max_stale: u64) -> JwksConfig {
        JwksConfig {
            jwks_refresh_interval: refresh,
            jwks_min_refresh_interval: min_refresh,
            jwks_max_stale: max_stale,
            http_timeout: 5,
        }
    }

    async fn mount_jwks(server: &MockServer, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn test_zero_http_timeout_is_rejected() {
        let config = JwksConfig {
            http_timeout: 0,
            ..JwksConfig::default()
        };
        assert!(matches!(
            config.validate("auth.jwt"),
            Err(ConfigError::Invalid(message)) if message == "auth.jwt.http_timeout must be positive"
        ));
        assert!(JwksConfig::default().validate("auth.jwt").is_ok());
    }

    #[test]
    fn test_load_pem_key() {
        let key = VerificationKey::load(PUBLIC_KEY).unwrap();
        assert!(key.accepts(Algorithm::RS256));
        assert!(key.accepts(Algorithm::PS512));
        assert!(!key.accepts(Algorithm::HS256));
    }

    #[test]
    fn test_load_hmac_secret_trims_line_break() {
        let key = VerificationKey::load("secret\n").unwrap();
        assert!(key.accepts(Algorithm::HS512));
        assert!(!key.accepts(Algorithm::RS256));

        assert!(VerificationKey::load("\n").is_err());
    }

    #[test]
    fn test_load_unsupported_pem() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            VerificationKey::load(pem),
            Err(ConfigError::KeyMaterial(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_known_key_is_cached() {
        let server = MockServer::start().await;
        mount_jwks(&server, 1).await;

        let store = JwksKeyStore::new(&format!("{}/jwks", server.uri()), &JwksConfig::default())
            .unwrap();

        for _ in 0..3 {
            let key = store
                .resolve(Some("test-rsa"), Algorithm::RS256)
                .await
                .unwrap();
            assert!(key.accepts(Algorithm::RS256));
        }
    }

    #[tokio::test]
    async fn test_resolve_without_kid_uses_single_key() {
        let server = MockServer::start().await;
        mount_jwks(&server, 1).await;

        let store = JwksKeyStore::new(&format!("{}/jwks", server.uri()), &JwksConfig::default())
            .unwrap();
        assert!(store.resolve(None, Algorithm::RS256).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_kid_refresh_is_rate_limited() {
        let server = MockServer::start().await;
        mount_jwks(&server, 1).await;

        let store = JwksKeyStore::new(
            &format!("{}/jwks", server.uri()),
            &jwks_config(3600, 60, 86400),
        )
        .unwrap();

        assert!(store.resolve(Some("test-rsa"), Algorithm::RS256).await.is_ok());
        for _ in 0..3 {
            assert_eq!(
                store.resolve(Some("rotated"), Algorithm::RS256).await.unwrap_err(),
                AuthenticationError::InvalidToken
            );
        }
    }

    #[tokio::test]
    async fn test_algorithm_must_match_key() {
        let server = MockServer::start().await;
        mount_jwks(&server, 1).await;

        let store = JwksKeyStore::new(&format!("{}/jwks", server.uri()), &JwksConfig::default())
            .unwrap();
        assert_eq!(
            store.resolve(Some("test-rsa"), Algorithm::HS256).await.unwrap_err(),
            AuthenticationError::InvalidToken
        );
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_fetch() {
        let server = MockServer::start().await;
        mount_jwks(&server, 1).await;

        let store = Arc::new(
            JwksKeyStore::new(&format!("{}/jwks", server.uri()), &JwksConfig::default())
                .unwrap(),
        );

        let lookups = (0..8).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.resolve(Some("test-rsa"), Algorithm::RS256).await })
        });

        for lookup in lookups.collect::<Vec<_>>() {
            assert!(lookup.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let store = JwksKeyStore::new(&format!("{}/jwks", server.uri()), &JwksConfig::default())
            .unwrap();
        assert_eq!(
            store.resolve(Some("test-rsa"), Algorithm::RS256).await.unwrap_err(),
            AuthenticationError::UpstreamUnavailable
        );
    }

    #[tokio::test]
    async fn test_slow_endpoint_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(JWKS)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = JwksConfig {
            http_timeout: 1,
            ..JwksConfig::default()
        };
        let store = JwksKeyStore::new(&format!("{}/jwks", server.uri()), &config).unwrap();
        assert_eq!(
            store.resolve(Some("test-rsa"), Algorithm::RS256).await.unwrap_err(),
            AuthenticationError::UpstreamUnavailable
        );
    }

    #[tokio::test]
    async fn test_stale_document_served_when_refresh_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        // every lookup finds the document expired and attempts a refresh
        let store = JwksKeyStore::new(
            &format!("{}/jwks", server.uri()),
            &jwks_config(0, 0, 86400),
        )
        .unwrap();

        assert!(store.resolve(Some("test-rsa"), Algorithm::RS256).await.is_ok());
        assert!(store.resolve(Some("test-rsa"), Algorithm::RS256).await.is_ok());
    }

    #[tokio::test]
    async fn test_document_beyond_max_stale_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = JwksKeyStore::new(&format!("{}/jwks", server.uri()), &jwks_config(0, 0, 0))
            .unwrap();

        assert_eq!(
            store.resolve(Some("test-rsa"), Algorithm::RS256).await.unwrap_err(),
            AuthenticationError::UpstreamUnavailable
        );
    }

    #[tokio::test]
    async fn test_unsupported_keys_are_skipped() {
        let server = MockServer::start().await;
        let document = serde_json::json!({
            "keys": [
                {"kty": "OKP", "crv": "X25519", "kid": "ignored", "x": "abc"},
                {"kty": "oct", "kid": "hmac", "alg": "HS256", "k": "c2VjcmV0"}
            ]
        });
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&server)
            .await;

        let store = JwksKeyStore::new(&format!("{}/jwks", server.uri()), &JwksConfig::default())
            .unwrap();
        assert!(store.resolve(Some("hmac"), Algorithm::HS256).await.is_ok());
        assert_eq!(
            store.resolve(Some("ignored"), Algorithm::EdDSA).await.unwrap_err(),
            AuthenticationError::InvalidToken
        );
    }
}
