//! Gateway - TCP listener that accepts incoming websocket connections.
//!
//! The Gateway binds to a socket, performs the websocket handshake, and
//! spawns one Session task per peer. On shutdown it stops accepting and
//! drains live sessions so their close frames reach the peers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::network::transport::WsTransport;
use crate::session::Session;
use crate::state::Core;

/// How long draining sessions get to close cleanly before being aborted.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The Gateway accepts incoming connections and spawns session handlers.
pub struct Gateway {
    listener: TcpListener,
    core: Arc<Core>,
    shutdown: watch::Receiver<bool>,
}

impl Gateway {
    /// Bind the gateway to the specified address.
    pub async fn bind(
        addr: SocketAddr,
        core: Arc<Core>,
        shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Gateway listening");
        Ok(Self {
            listener,
            core,
            shutdown,
        })
    }

    /// The address the gateway actually bound (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the gateway, accepting connections until shutdown, then drain.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(mut self) -> std::io::Result<()> {
        let mut sessions: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "Connection accepted");

                        let core = Arc::clone(&self.core);
                        let shutdown = self.shutdown.clone();
                        let send_timeout =
                            Duration::from_secs(core.config.channel.send_timeout_secs);

                        sessions.spawn(async move {
                            let ws = match tokio_tungstenite::accept_async(stream).await {
                                Ok(ws) => ws,
                                Err(e) => {
                                    debug!(%addr, error = %e, "Websocket handshake failed");
                                    return;
                                }
                            };

                            let session_id = Uuid::new_v4();
                            let transport = WsTransport::new(ws, send_timeout);
                            let session =
                                Session::new(session_id, addr, core, transport, shutdown);
                            session.run().await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                _ = self.shutdown.changed() => break,
            }
        }

        info!(active = sessions.len(), "Gateway draining sessions");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Drain timeout - aborting remaining sessions");
            sessions.abort_all();
        }
        Ok(())
    }
}
