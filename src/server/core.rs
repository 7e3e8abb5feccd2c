use log::{error, info, warn};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::client::handle_client;
use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::relay::RelayContext;
use crate::server::ShutdownHandle;

pub struct Server {
    listener: TcpListener,
    ctx: RelayContext,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Validate the configuration and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let socket = config.listen_socket();

        let listener = TcpListener::bind(&socket)
            .await
            .map_err(|e| RelayError::Bind(socket.clone(), e))?;
        info!("Server bound to {}", listener.local_addr()?);

        Ok(Self {
            listener,
            ctx: RelayContext::new(config),
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is triggered, then wait (bounded by
    /// `shutdown_grace_ms`) for every connection to close.
    pub async fn run(self) -> Result<(), RelayError> {
        let Server {
            listener,
            ctx,
            shutdown,
        } = self;
        let mut stop = shutdown.subscribe();
        let mut sessions = JoinSet::new();

        info!(
            "Starting chat relay on {} (max {} clients, self-delivery {:?})",
            listener.local_addr()?,
            ctx.config.max_clients,
            ctx.config.self_delivery
        );

        if !shutdown.is_triggered() {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            info!("New client connected: {}", addr);
                            // Spawn a task for each client so accept loop doesn't block
                            let session = handle_client(stream, ctx.clone(), shutdown.subscribe());
                            sessions.spawn(session);
                        }
                        Err(e) => error!("Error accepting connection: {}", e),
                    },
                    Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                        if let Err(e) = finished {
                            error!("Connection task failed: {}", e);
                        }
                    }
                }
            }
        }

        drop(listener);
        info!("Shutting down, closing {} connection(s)", sessions.len());

        let grace = ctx.config.shutdown_grace();
        let drained = timeout(grace, async {
            while let Some(finished) = sessions.join_next().await {
                if let Err(e) = finished {
                    error!("Connection task failed: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connection(s) still open after {:?}, aborting",
                sessions.len(),
                grace
            );
            sessions.shutdown().await;
        }

        info!("Server stopped");
        Ok(())
    }
}
