use crate::command::server::connection::ConnectionInfo;
use crate::command::server::error::Error;
use crate::command::server::http_server::serve_request;
use crate::command::server::listeners::{accept, build_listener, connection_timeouts};
use crate::command::server::ServerContext;
use crate::configuration::{self, ServerConfig, ServerTlsConfig};
use hyper_util::rt::TokioIo;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// HTTPS listener. When a client CA bundle is configured, client certificates are requested and
/// verified but not required; the verified leaf is handed to the certificate authenticator.
pub struct TlsListener {
    binding_address: SocketAddr,
    tls_acceptor: TlsAcceptor,
    context: Arc<ServerContext>,
    timeouts: [Duration; 2],
}

impl TlsListener {
    pub fn new(
        server_config: &ServerConfig,
        tls_config: &ServerTlsConfig,
        context: Arc<ServerContext>,
    ) -> Result<Self, configuration::Error> {
        Ok(Self {
            binding_address: SocketAddr::new(server_config.bind_address, tls_config.port),
            tls_acceptor: Self::build_tls_acceptor(tls_config)?,
            context,
            timeouts: connection_timeouts(server_config),
        })
    }

    fn build_tls_acceptor(
        tls_config: &ServerTlsConfig,
    ) -> Result<TlsAcceptor, configuration::Error> {
        let server_certs = CertificateDer::pem_file_iter(&tls_config.server_certificate_bundle)?
            .collect::<Result<_, _>>()?;
        let server_key = PrivateKeyDer::from_pem_file(&tls_config.server_private_key)?;

        let server_config = if let Some(client_ca_bundle) = tls_config.client_ca_bundle.as_ref() {
            debug!("Client CA bundle detected (client certificates will be requested)");
            let client_certs: Vec<CertificateDer> =
                CertificateDer::pem_file_iter(client_ca_bundle)?.collect::<Result<_, _>>()?;

            let mut client_cert_store = RootCertStore::empty();
            for client_cert in client_certs {
                client_cert_store.add(client_cert)?;
            }

            let client_cert_verifier = WebPkiClientVerifier::builder(Arc::new(client_cert_store))
                .allow_unauthenticated()
                .build()?;

            rustls::ServerConfig::builder()
                .with_client_cert_verifier(client_cert_verifier)
                .with_single_cert(server_certs, server_key)?
        } else {
            debug!("No client CA bundle detected (client certificates are not requested)");

            rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(server_certs, server_key)?
        };

        Ok(TlsAcceptor::from(Arc::new(server_config)))
    }

    pub async fn serve(&self) -> Result<(), Error> {
        info!("Listening on {} (HTTPS)", self.binding_address);
        let listener = build_listener(self.binding_address).await?;

        loop {
            let (tcp, remote_address) = accept(&listener).await?;

            let tls = match self.tls_acceptor.accept(tcp).await {
                Ok(tls) => tls,
                Err(err) => {
                    debug!("TLS handshake with {remote_address} failed: {err}");
                    continue;
                }
            };

            let (_, session) = tls.get_ref();
            let peer_certificate = session
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map(|cert| cert.to_vec());

            let stream = TokioIo::new(tls);
            tokio::spawn(Box::pin(serve_request(
                stream,
                Arc::clone(&self.context),
                ConnectionInfo::tls(remote_address, peer_certificate),
                self.timeouts,
            )));
        }
    }
}
