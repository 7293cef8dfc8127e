//! Test server management.
//!
//! Runs the full server in-process on an ephemeral port, so tests exercise
//! the real gateway, sessions, and registry over real websockets without a
//! prebuilt binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use latticed::config::Config;
use latticed::network::Gateway;
use latticed::state::Core;

/// An in-process server instance.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a server with default configuration on an ephemeral port.
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with(Config::default()).await
    }

    /// Spawn a server with the given configuration on an ephemeral port.
    pub async fn spawn_with(mut config: Config) -> anyhow::Result<Self> {
        config.server.bind = "127.0.0.1:0".to_string();
        config.server.metrics_port = 0;

        let bind_addr = config.bind_addr()?;
        let core = Arc::new(Core::new(config)?);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let gateway = Gateway::bind(bind_addr, core, shutdown_rx).await?;
        let addr = gateway.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = gateway.run().await;
        });

        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    /// The websocket URL peers connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Signal shutdown and wait for the gateway to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
