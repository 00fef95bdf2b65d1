use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hyper::header::{AsHeaderName, AUTHORIZATION, COOKIE, HOST};
use hyper::http::request::Parts;
use tracing::debug;

pub const FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const FORWARDED_HOST: &str = "x-forwarded-host";

pub trait HeaderExt {
    fn get_header<K: AsHeaderName>(&self, header: K) -> Option<String>;
    fn bearer_token(&self) -> Option<String>;
    fn basic_auth(&self) -> Option<(String, String)>;
    fn cookie(&self, name: &str) -> Option<String>;
    fn external_base_uri(&self, secure: bool, process_forwarded: bool) -> String;
}

impl HeaderExt for Parts {
    fn get_header<K>(&self, header: K) -> Option<String>
    where
        K: AsHeaderName,
    {
        self.headers
            .get(header)
            .and_then(|header| header.to_str().ok())
            .map(ToString::to_string)
    }

    fn bearer_token(&self) -> Option<String> {
        let authorization = self.get_header(AUTHORIZATION)?;
        authorization
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToString::to_string)
    }

    fn basic_auth(&self) -> Option<(String, String)> {
        let authorization = self.get_header(AUTHORIZATION)?;
        let encoded = authorization.strip_prefix("Basic ")?;

        let decoded = BASE64_STANDARD
            .decode(encoded.trim())
            .inspect_err(|error| debug!("Invalid basic auth encoding: {error}"))
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;

        let (username, password) = decoded.split_once(':')?;
        Some((username.to_string(), password.to_string()))
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    fn external_base_uri(&self, secure: bool, process_forwarded: bool) -> String {
        let forwarded = |header: &str| {
            if process_forwarded {
                self.get_header(header)
                    .and_then(|value| value.split(',').next().map(|v| v.trim().to_string()))
                    .filter(|value| !value.is_empty())
            } else {
                None
            }
        };

        let scheme = forwarded(FORWARDED_PROTO)
            .unwrap_or_else(|| if secure { "https" } else { "http" }.to_string());
        let host = forwarded(FORWARDED_HOST)
            .or_else(|| self.get_header(HOST))
            .or_else(|| self.uri.authority().map(ToString::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        format!("{scheme}://{host}")
    }
}
