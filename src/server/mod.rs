pub mod codec;
pub mod connection;
pub mod session;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::access::policy::{self, AccessPolicy};
use crate::config::{Config, StorageChoice};
use crate::storage::memory::MemoryBackend;
use crate::storage::mongo::MongoBackend;
use crate::storage::StorageBackend;

pub struct Server {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    policy: Arc<AccessPolicy>,
}

impl Server {
    pub async fn new(config: Config) -> crate::Result<Self> {
        let storage: Arc<dyn StorageBackend> = match config.storage.backend {
            StorageChoice::Mongodb => {
                let mongo = &config.storage.mongodb;
                Arc::new(
                    MongoBackend::connect(
                        &mongo.uri,
                        &mongo.database,
                        &mongo.collection,
                        &mongo.ace_collection,
                    )
                    .await?,
                )
            }
            StorageChoice::Memory => Arc::new(MemoryBackend::new()),
        };
        Ok(Self::with_backend(config, storage))
    }

    /// Builds a server over an already-constructed backend.
    pub fn with_backend(config: Config, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            config,
            storage,
            policy: Arc::new(AccessPolicy::new()),
        }
    }

    pub async fn run(self) -> crate::Result<()> {
        let listener =
            TcpListener::bind((self.config.bind_address.as_str(), self.config.port)).await?;
        info!(
            "LDAP server listening on {}:{}",
            self.config.bind_address, self.config.port
        );
        self.serve(listener).await
    }

    /// Accept loop over an existing listener: one task per connection, plus
    /// the long-lived access-rule refresher.
    pub async fn serve(self, listener: TcpListener) -> crate::Result<()> {
        tokio::spawn(policy::refresh_task(
            Arc::clone(&self.policy),
            Arc::clone(&self.storage),
            self.config.acl_refresh_period,
        ));

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("new connection from {}", addr);

                    let storage = Arc::clone(&self.storage);
                    let policy = Arc::clone(&self.policy);
                    let no_authentication = self.config.no_authentication;

                    tokio::spawn(async move {
                        if let Err(e) = connection::handle_connection(
                            socket,
                            storage,
                            policy,
                            no_authentication,
                        )
                        .await
                        {
                            error!("connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}
