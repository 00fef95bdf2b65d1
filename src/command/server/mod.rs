use argh::FromArgs;
use std::sync::Arc;
use tracing::info;

pub mod auth;
mod connection;
mod cookie;
mod error;
mod handlers;
mod http_server;
mod listeners;
pub mod management;
mod request_ext;
mod resource_security;
mod response_body;
mod router;
mod server_context;

pub use error::Error;
pub use server_context::ServerContext;

use crate::command;
use crate::command::server::listeners::insecure::InsecureListener;
use crate::command::server::listeners::tls::TlsListener;
use crate::configuration::{self, Configuration};

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "serve",
    description = "Run the coordinator HTTP and HTTPS listeners"
)]
pub struct Options {}

pub struct Command {
    insecure: InsecureListener,
    secure: Option<TlsListener>,
}

impl Command {
    pub fn new(config: &Configuration) -> Result<Command, configuration::Error> {
        let context = Arc::new(ServerContext::new(config)?);

        let secure = match &config.server.https {
            Some(tls_config) => Some(TlsListener::new(
                &config.server,
                tls_config,
                Arc::clone(&context),
            )?),
            None => None,
        };
        let insecure = InsecureListener::new(&config.server, context);

        Ok(Command { insecure, secure })
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        info!(
            "Starting coordinator (HTTPS {})",
            if self.secure.is_some() { "enabled" } else { "disabled" }
        );

        match &self.secure {
            Some(secure) => {
                tokio::try_join!(self.insecure.serve(), secure.serve())?;
            }
            None => self.insecure.serve().await?,
        }

        Ok(())
    }
}
