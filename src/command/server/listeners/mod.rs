use crate::command::server::error::Error;
use crate::configuration::ServerConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

pub mod insecure;
pub mod tls;

/// Connection lifetime first, then the grace period granted after a graceful shutdown request.
fn connection_timeouts(config: &ServerConfig) -> [Duration; 2] {
    [
        Duration::from_secs(config.query_timeout),
        Duration::from_secs(config.query_timeout_grace_period),
    ]
}

async fn build_listener(binding_address: SocketAddr) -> Result<TcpListener, Error> {
    TcpListener::bind(binding_address).await.map_err(|err| {
        Error::Initialization(format!("Failed to bind to {binding_address}: {err}"))
    })
}

async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), Error> {
    match listener.accept().await {
        Ok((stream, remote_address)) => {
            debug!("Accepted connection from {remote_address}");
            Ok((stream, remote_address))
        }
        Err(err) => {
            let msg = format!("Failed to accept incoming connection: {err}");
            Err(Error::Execution(msg))
        }
    }
}
