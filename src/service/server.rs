//! # Server
//!
//! TCP accept loop and the per-connection driver.
//!
//! Each accepted socket gets its own task that owns the [`Session`] and its
//! [`ConnectionState`]. The task waits on these sources at once:
//! - socket readiness: read and dispatch every complete packet
//! - the player mailbox: write chat and disconnects from other tasks, only
//!   while no earlier output is waiting on the socket
//! - socket writability, while output is waiting
//! - the keepalive timer (Play only): ping, or drop a silent client
//! - the shutdown signal
//!
//! ## Shutdown
//! On shutdown every player is told "Server closed", connection tasks are
//! signalled, and the server waits up to `shutdown_timeout` for them to
//! finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::EngineConfig;
use crate::core::phase::Phase;
use crate::error::Result;
use crate::players::{ChatComponent, ChatType, Outbound};
use crate::protocol::dispatcher::{apply, dispatch, ConnectionState, Flow, HandlerOutcome};
use crate::protocol::message::ClientboundPacket;
use crate::protocol::ServerContext;
use crate::service::session::{Session, CLOSE_FLUSH_TIMEOUT};
use crate::utils::metrics::global_metrics;

pub struct Server {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl Server {
    /// Bind the configured address
    #[instrument(skip(config), fields(address = %config.server.address))]
    pub async fn bind(config: EngineConfig) -> Result<Self> {
        config.validate_strict()?;
        let listener = TcpListener::bind(&config.server.address).await?;
        info!(address = %listener.local_addr()?, "Listening");
        Ok(Self {
            listener,
            context: Arc::new(ServerContext::new(config)),
        })
    }

    /// Bind with an existing context, e.g. one carrying a key exchange
    pub async fn bind_with_context(context: ServerContext) -> Result<Self> {
        context.config.validate_strict()?;
        let listener = TcpListener::bind(&context.config.server.address).await?;
        info!(address = %listener.local_addr()?, "Listening");
        Ok(Self {
            listener,
            context: Arc::new(context),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Run until Ctrl-C
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(shutdown_rx).await
    }

    /// Run until a message arrives on `shutdown_rx` (or its sender is dropped)
    #[instrument(skip_all)]
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let active_connections = Arc::new(Mutex::new(0usize));
        let server = &self.context.config.server;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for connections to close...");
                    let notice = ChatComponent::text("Server closed");
                    match self.context.broadcaster.broadcast_forced(&notice, ChatType::System) {
                        Ok(reached) => debug!(reached, "Shutdown notice sent"),
                        Err(e) => warn!(error = %e, "Failed to send shutdown notice"),
                    }
                    let _ = stop_tx.send(true);

                    let timeout = tokio::time::sleep(server.shutdown_timeout);
                    tokio::pin!(timeout);

                    loop {
                        tokio::select! {
                            _ = &mut timeout => {
                                warn!("Shutdown timeout reached, forcing exit");
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                                let connections = *active_connections.lock().await;
                                trace!(connections, "Waiting for connections to close");
                                if connections == 0 {
                                    info!("All connections closed, shutting down");
                                    break;
                                }
                            }
                        }
                    }

                    global_metrics().log_metrics();
                    return Ok(());
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            {
                                let mut count = active_connections.lock().await;
                                if *count >= server.max_connections {
                                    warn!(%peer, limit = server.max_connections, "Connection limit reached, refusing");
                                    global_metrics().connection_refused();
                                    drop(stream);
                                    continue;
                                }
                                *count += 1;
                            }
                            global_metrics().connection_established();

                            let context = self.context.clone();
                            let active_connections = active_connections.clone();
                            let stop_rx = stop_rx.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(context, stream, peer, stop_rx).await {
                                    debug!(%peer, error = %e, "Connection ended with error");
                                }

                                global_metrics().connection_closed();
                                let mut count = active_connections.lock().await;
                                *count -= 1;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }
}

#[instrument(skip(context, stream, shutdown), fields(peer = %peer))]
async fn handle_connection(
    context: Arc<ServerContext>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let session = Session::from_socket(stream, &context.config.session, context.codec.clone())?;
    debug!("Connection accepted");
    drive_session(&context, session, shutdown).await;
    Ok(())
}

async fn next_outbound(mailbox: &mut Option<mpsc::Receiver<Outbound>>) -> Option<Outbound> {
    match mailbox {
        Some(rx) => rx.recv().await,
        None => futures::future::pending().await,
    }
}

/// Read and dispatch every packet already available. Returns `Flow::Close`
/// as soon as an outcome ends the session.
async fn drain_packets(ctx: &ServerContext, session: &mut Session, state: &mut ConnectionState) -> Flow {
    loop {
        let outcome = match session.try_read_packet() {
            Ok(Some(packet)) => dispatch(ctx, session, state, packet),
            Ok(None) => return Flow::Continue,
            Err(e) => HandlerOutcome::from_error(e, session.phase()),
        };
        let terminal = outcome.is_terminal();
        if apply(session, outcome).await == Flow::Close {
            return Flow::Close;
        }
        if terminal {
            return Flow::Close;
        }
    }
}

/// Queue one mailbox item. Returns `Flow::Close` for a disconnect.
fn deliver(session: &mut Session, item: Outbound) -> Result<Flow> {
    match item {
        Outbound::Chat { json, chat_type } => {
            session.queue_packet(&ClientboundPacket::ChatMessage {
                json,
                position: chat_type,
            })?;
            Ok(Flow::Continue)
        }
        Outbound::Disconnect { reason } => {
            let json = ChatComponent::text(reason).to_json()?;
            session.queue_packet(&ClientboundPacket::PlayDisconnect { reason: json })?;
            Ok(Flow::Close)
        }
    }
}

/// Queue whatever is already waiting in the mailbox
fn drain_mailbox(session: &mut Session, state: &mut ConnectionState) -> Result<Flow> {
    let Some(mailbox) = state.mailbox.as_mut() else {
        return Ok(Flow::Continue);
    };
    while let Ok(item) = mailbox.try_recv() {
        if deliver(session, item)? == Flow::Close {
            return Ok(Flow::Close);
        }
    }
    Ok(Flow::Continue)
}

/// Send a keepalive request, or report that the last one timed out
fn keepalive_tick(ctx: &ServerContext, session: &mut Session, state: &ConnectionState) -> Result<Flow> {
    let Some(player) = state.player.as_ref() else {
        return Ok(Flow::Continue);
    };
    let now = Instant::now();
    let timeout = ctx.config.server.keepalive_timeout;
    if player.with_keepalive(|k| k.is_expired(now, timeout)) {
        info!(player = %player.username(), "Keepalive timed out");
        return Ok(Flow::Close);
    }
    if player.with_keepalive(|k| k.pending_id().is_some()) {
        return Ok(Flow::Continue);
    }
    let id: i64 = rand::random();
    player.with_keepalive(|k| k.start(id, now));
    session.queue_packet(&ClientboundPacket::KeepAlive { id })?;
    Ok(Flow::Continue)
}

/// Run a session until it closes, then deregister its player
pub async fn drive_session(ctx: &ServerContext, mut session: Session, mut shutdown: watch::Receiver<bool>) {
    let mut state = ConnectionState::default();
    let mut keepalive = tokio::time::interval_at(
        Instant::now() + ctx.config.server.keepalive_interval,
        ctx.config.server.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if drain_packets(ctx, &mut session, &mut state).await == Flow::Close {
            break;
        }
        let pending = match session.try_flush() {
            Ok(pending) => pending,
            Err(e) => {
                debug!(error = %e, "Flush failed");
                break;
            }
        };
        if *shutdown.borrow() {
            if let Err(e) = drain_mailbox(&mut session, &mut state) {
                debug!(error = %e, "Could not deliver final messages");
            }
            let _ = session.flush_within(CLOSE_FLUSH_TIMEOUT).await;
            break;
        }

        // While output is backed up the mailbox is left alone, so a peer that
        // stops reading fills its mailbox instead of our write buffer
        let readiness = session.readiness();
        let in_play = session.phase() == Phase::Play;
        let flow = tokio::select! {
            ready = readiness.readable() => ready.map(|_| Flow::Continue),
            ready = readiness.writable(), if pending > 0 => ready.map(|_| Flow::Continue),
            item = next_outbound(&mut state.mailbox), if pending == 0 => match item {
                Some(item) => deliver(&mut session, item),
                None => {
                    state.mailbox = None;
                    Ok(Flow::Continue)
                }
            },
            _ = keepalive.tick(), if in_play => keepalive_tick(ctx, &mut session, &state),
            _ = shutdown.changed() => drain_mailbox(&mut session, &mut state).map(|_| Flow::Close),
        };

        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => {
                let _ = session.flush_within(CLOSE_FLUSH_TIMEOUT).await;
                break;
            }
            Err(e) => {
                debug!(error = %e, "Connection loop error");
                break;
            }
        }
    }

    session.close();
    if let Some(player) = state.player.take() {
        ctx.registry.leave(player.id());
        let left = ChatComponent::text(format!("{} left the game", player.username())).with_color("yellow");
        if let Err(e) = ctx.broadcaster.broadcast(&left, ChatType::System) {
            warn!(error = %e, "Failed to announce departure");
        }
    }
    debug!(phase = ?session.phase(), "Connection closed");
}
