use opentelemetry_otlp::ExporterBuildError;
use rustls_pki_types::pem;
use std::{fmt, io};
use tracing::debug;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    ConfigurationFileFormat(String),
    Invalid(String),
    UserMapping(String),
    PolicyCompilation(String),
    KeyMaterial(String),
    Http(String),
    Tls(String),
    ExporterInit(ExporterBuildError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {err}"),
            Error::ConfigurationFileFormat(error) => {
                write!(f, "Configuration file format error.")?;
                write!(f, "{error}")
            }
            Error::Invalid(error) => write!(f, "Invalid configuration: {error}"),
            Error::UserMapping(error) => write!(f, "User mapping error: {error}"),
            Error::PolicyCompilation(msg) => write!(f, "Policy compilation error: {msg}"),
            Error::KeyMaterial(error) => write!(f, "Key material error: {error}"),
            Error::Http(error) => write!(f, "HTTP error: {error}"),
            Error::Tls(error) => write!(f, "TLS error: {error}"),
            Error::ExporterInit(error) => write!(f, "Exporter initialization error: {error}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        debug!("TOML error: {error}");
        Error::ConfigurationFileFormat(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Http(format!("Failed to build HTTP client: {error}"))
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

impl From<rustls::server::VerifierBuilderError> for Error {
    fn from(err: rustls::server::VerifierBuilderError) -> Self {
        Error::Tls(err.to_string())
    }
}

impl From<pem::Error> for Error {
    fn from(err: pem::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

impl From<ExporterBuildError> for Error {
    fn from(error: ExporterBuildError) -> Self {
        Error::ExporterInit(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::Invalid("jwt requires a key source".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: jwt requires a key source"
        );

        let error = Error::UserMapping("bad pattern".to_string());
        assert_eq!(error.to_string(), "User mapping error: bad pattern");
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("not = = toml").unwrap_err();
        let error: Error = toml_error.into();
        assert!(matches!(error, Error::ConfigurationFileFormat(_)));
    }

    #[test]
    fn test_from_io_error() {
        let error: Error = io::Error::other("missing file").into();
        assert!(matches!(error, Error::Io(_)));
        assert_eq!(error.to_string(), "IO error: missing file");
    }
}
