//! TCP listener for entry-store.
//!
//! Accepts connections and hands each one to its own task running
//! [`handle_connection`]. Handlers share nothing but the [`Store`].

use crate::config::Config;
use crate::handler::handle_connection;
use crate::storage::Store;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Server instance
pub struct Server {
    listener: TcpListener,
    store: Arc<Store>,
    /// Admission cap on concurrent handlers; `None` accepts without limit.
    connection_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Bind the listening socket and open the store.
    pub async fn bind(config: &Config) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        let store = Store::new(config.data_file.clone());

        match store.count().await {
            Ok(entries) => info!(entries, data_file = %store.path().display(), "Collection loaded"),
            Err(e) => warn!(
                error = %e,
                data_file = %store.path().display(),
                "Collection is not readable"
            ),
        }

        if config.max_connections.is_none() {
            debug!("No connection limit configured");
        }

        Ok(Server {
            listener,
            store,
            connection_limit: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max.get()))),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(address = %self.local_addr()?, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = match &self.connection_limit {
                Some(limit) => Some(Arc::clone(limit).acquire_owned().await?),
                None => None,
            };

            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let store = Arc::clone(&self.store);

                    tokio::spawn(async move {
                        match handle_connection(stream, store).await {
                            Ok(Some(status)) => {
                                debug!(peer = %addr, status = status.code(), "Connection closed")
                            }
                            Ok(None) => debug!(peer = %addr, "Connection abandoned"),
                            Err(e) => debug!(peer = %addr, error = %e, "Connection error"),
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Get a reference to the store for testing
    #[cfg(test)]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
