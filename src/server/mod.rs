// src/server/mod.rs

//! Listener setup, the accept loop, and graceful shutdown.

use crate::config::Config;
use crate::connection::SessionHandler;
use crate::core::upstream::{Dialer, Endpoint, UpstreamRegistry};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

// Platform-specific signal handling imports.
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// The bound proxy: listener plus the state shared by every session.
pub struct Server {
    listener: TcpListener,
    dialer: Arc<Dialer>,
    registry: Arc<UpstreamRegistry>,
}

impl Server {
    /// Binds the listen port. A bind failure is fatal to startup.
    pub async fn bind(config: &Config) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .with_context(|| format!("failed to bind listen port {}", config.port))?;
        let endpoint = Endpoint {
            host: config.upstream.host.clone(),
            port: config.upstream.port,
            auth: config.upstream.auth.clone(),
        };
        info!(listen = %listener.local_addr()?, upstream = %endpoint, "beryl listening");
        Ok(Self {
            listener,
            dialer: Arc::new(Dialer::new(endpoint)),
            registry: Arc::new(UpstreamRegistry::new()),
        })
    }

    /// The address actually bound, for embedders that listen on port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn dialer(&self) -> Arc<Dialer> {
        Arc::clone(&self.dialer)
    }

    /// Accepts clients until a shutdown signal arrives, spawning one
    /// session task per connection.
    pub async fn run(self) -> Result<()> {
        let mut sessions: JoinSet<()> = JoinSet::new();
        let mut session_id: u64 = 0;

        loop {
            tokio::select! {
                biased;

                _ = await_shutdown_signal() => {
                    info!("shutdown signal received");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            session_id = session_id.wrapping_add(1);
                            debug!(session = session_id, %peer, "accepted client connection");
                            let handler = SessionHandler::new(
                                socket,
                                peer,
                                session_id,
                                Arc::clone(&self.dialer),
                                Arc::clone(&self.registry),
                            );
                            sessions.spawn(handler.run());
                        }
                        Err(e) => error!(error = %e, "failed to accept connection"),
                    }
                }

                // Reap finished session tasks.
                Some(finished) = sessions.join_next() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("session task panicked: {e:?}");
                        }
                    }
                }
            }
        }

        // Sever whatever is still proxied, then stop the session tasks.
        self.registry.close_all().await;
        sessions.shutdown().await;
        info!("server shutdown complete");
        Ok(())
    }
}

/// Waits for SIGINT or SIGTERM on Unix, Ctrl-C elsewhere.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(_) => return std::future::pending().await,
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(_) => return std::future::pending().await,
        };
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
