use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::client::{CloseReason, Connection, ReadLine, SupervisorState};
use crate::error::RegistryError;
use crate::error::handlers::is_disconnect;
use crate::protocol::{ConnectionId, Message, responses};
use crate::relay::RelayContext;
use crate::utils::validation::relayable;

/// Entry point for an accepted stream: wraps it and supervises it to completion.
pub async fn handle_client(
    stream: TcpStream,
    ctx: RelayContext,
    shutdown: watch::Receiver<bool>,
) {
    let connection = Connection::open(ConnectionId::next(), stream, &ctx.config);
    let id = connection.id();
    let peer = connection.peer().to_string();

    match ConnectionSupervisor::new(connection, ctx, shutdown).run().await {
        Ok(reason) => info!("{} ({}) disconnected: {}", id, peer, reason),
        Err(e) => warn!("{} ({}) refused: {}", id, peer, e),
    }
}

enum Event {
    Read(std::io::Result<ReadLine>),
    SinkFailed,
    Shutdown,
}

/// Per-connection control loop.
///
/// Reads lines sequentially and broadcasts each one before reading the next,
/// which is what keeps one sender's messages in order for every recipient.
pub struct ConnectionSupervisor {
    connection: Connection,
    ctx: RelayContext,
    shutdown: watch::Receiver<bool>,
    state: SupervisorState,
}

impl ConnectionSupervisor {
    pub fn new(connection: Connection, ctx: RelayContext, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            connection,
            ctx,
            shutdown,
            state: SupervisorState::Connecting,
        }
    }

    /// Drive the connection through its whole lifecycle.
    ///
    /// Returns why the connection ended, or the admission error if it was
    /// never registered.
    pub async fn run(mut self) -> Result<CloseReason, RegistryError> {
        let id = self.connection.id();
        let config = Arc::clone(&self.ctx.config);

        // Connecting
        let admitted = self
            .ctx
            .registry
            .admit(id, self.connection.sink().clone(), config.max_clients)
            .await;
        match admitted {
            Ok(count) => info!(
                "{} connected from {} ({}/{} clients)",
                id,
                self.connection.peer(),
                count,
                config.max_clients
            ),
            Err(e) => {
                if matches!(e, RegistryError::Full { .. }) {
                    self.send_private(responses::server_full()).await;
                }
                self.transition(SupervisorState::Closed);
                let grace = self.close_grace();
                self.connection.close(grace).await;
                return Err(e);
            }
        }

        self.transition(SupervisorState::Active);
        self.send_private(responses::welcome(id)).await;
        if config.announce_presence {
            self.ctx.broadcaster.broadcast(responses::joined(id)).await;
        }

        let reason = self.relay_lines().await;

        self.transition(SupervisorState::Closing);
        self.ctx.registry.remove(id).await;
        if config.announce_presence {
            self.ctx.broadcaster.broadcast(responses::left(id)).await;
        }
        self.transition(SupervisorState::Closed);
        let grace = self.close_grace();
        self.connection.close(grace).await;

        Ok(reason)
    }

    /// The `Active` loop
    async fn relay_lines(&mut self) -> CloseReason {
        let id = self.connection.id();
        if *self.shutdown.borrow_and_update() {
            return CloseReason::Shutdown;
        }

        loop {
            let event = {
                let (reader, sink) = self.connection.io_mut();
                tokio::select! {
                    biased;
                    _ = self.shutdown.changed() => Event::Shutdown,
                    read = reader.next_line() => Event::Read(read),
                    _ = sink.closed() => Event::SinkFailed,
                }
            };

            match event {
                Event::Read(Ok(ReadLine::Line(line))) => {
                    let Some(text) = relayable(&line) else {
                        debug!("Ignoring empty or invalid line from {}", id);
                        continue;
                    };
                    debug!("Received from {}: {}", id, text);
                    self.ctx
                        .broadcaster
                        .broadcast(Message::from_client(id, text))
                        .await;
                }
                Event::Read(Ok(ReadLine::TooLong(len))) => {
                    let limit = self.ctx.config.max_line_length;
                    warn!("Discarded {}-byte line from {} (limit {})", len, id, limit);
                    self.send_private(responses::line_too_long(limit)).await;
                }
                Event::Read(Ok(ReadLine::Eof)) => return CloseReason::PeerClosed,
                Event::Read(Err(e)) => {
                    if !is_disconnect(&e) {
                        error!("Failed to read from {}: {}", id, e);
                    }
                    return CloseReason::ReadFailed(e);
                }
                Event::SinkFailed => return CloseReason::SinkFailed,
                Event::Shutdown => return CloseReason::Shutdown,
            }
        }
    }

    /// Queue a server notice for this connection only
    fn send_private(&self, message: Message) -> impl Future<Output = ()> + Send + 'static {
        let sink = self.connection.sink().clone();
        let wait = self.ctx.config.delivery_timeout();
        async move {
            if let Err(e) = sink.deliver(Arc::new(message), wait).await {
                debug!("Private notice not delivered: {}", e);
            }
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        let id = self.connection.id();
        debug!("{}: {} -> {}", id, self.state, next);
        self.state = next;
    }

    /// Time a closing connection's writer gets to flush what is queued.
    ///
    /// Other tasks may still hold its sink from a snapshot taken before removal.
    /// Never longer than the server's shutdown grace, and nothing at all once
    /// the writer has stopped.
    fn close_grace(&self) -> Duration {
        if !self.connection.is_alive() {
            return Duration::ZERO;
        }
        let config = &self.ctx.config;
        let drain = config.delivery_timeout() + config.write_timeout();
        drain.min(config.shutdown_grace())
    }
}
