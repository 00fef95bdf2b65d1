use std::net::SocketAddr;
use std::sync::Arc;

/// DER-encoded leaf certificate presented by the client and verified during the TLS handshake.
#[derive(Clone, Debug)]
pub struct PeerCertificate(pub Arc<Vec<u8>>);

/// Transport facts attached to every request by the listener that accepted it.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub remote_address: SocketAddr,
    pub secure: bool,
    pub peer_certificate: Option<PeerCertificate>,
}

impl ConnectionInfo {
    pub fn plaintext(remote_address: SocketAddr) -> Self {
        Self {
            remote_address,
            secure: false,
            peer_certificate: None,
        }
    }

    pub fn tls(remote_address: SocketAddr, peer_certificate: Option<Vec<u8>>) -> Self {
        Self {
            remote_address,
            secure: true,
            peer_certificate: peer_certificate.map(|der| PeerCertificate(Arc::new(der))),
        }
    }
}
