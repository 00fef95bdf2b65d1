use crate::command::server::connection::ConnectionInfo;
use crate::command::server::error::Error;
use crate::command::server::http_server::serve_request;
use crate::command::server::listeners::{accept, build_listener, connection_timeouts};
use crate::command::server::ServerContext;
use crate::configuration::ServerConfig;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Plain HTTP listener. Requests it accepts are never marked secure.
pub struct InsecureListener {
    binding_address: SocketAddr,
    context: Arc<ServerContext>,
    timeouts: [Duration; 2],
}

impl InsecureListener {
    pub fn new(server_config: &ServerConfig, context: Arc<ServerContext>) -> Self {
        Self {
            binding_address: SocketAddr::new(server_config.bind_address, server_config.port),
            context,
            timeouts: connection_timeouts(server_config),
        }
    }

    pub async fn serve(&self) -> Result<(), Error> {
        info!("Listening on {} (HTTP)", self.binding_address);
        let listener = build_listener(self.binding_address).await?;

        loop {
            debug!("Waiting for incoming connection");
            let (tcp, remote_address) = accept(&listener).await?;

            let stream = TokioIo::new(tcp);
            tokio::spawn(Box::pin(serve_request(
                stream,
                Arc::clone(&self.context),
                ConnectionInfo::plaintext(remote_address),
                self.timeouts,
            )));
        }
    }
}
