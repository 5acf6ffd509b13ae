//! QUIC listener for swarm peers.
//!
//! Accepts sessions (QUIC connections), accepts streams within each session,
//! and hands every stream to the stream dispatcher. Sessions and streams each
//! run on their own task and never wait on one another.

use crate::chunk::{ChunkSource, FixedAssetSource};
use crate::config::Config;
use crate::protocols::swarm::StreamDispatcher;
use crate::tls::{self, TlsError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace};

/// Startup failures
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("Failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },
    #[error("No address found for {host}:{port}")]
    NoAddress { host: String, port: u16 },
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Accepts sessions and serves their streams
pub struct Listener {
    dispatcher: StreamDispatcher,
    session_limit: Arc<Semaphore>,
}

impl Listener {
    /// Create a listener that answers streams with `dispatcher`
    pub fn new(dispatcher: StreamDispatcher, max_sessions: usize) -> Self {
        Listener {
            dispatcher,
            session_limit: Arc::new(Semaphore::new(max_sessions)),
        }
    }

    /// Build a listener from configuration, serving chunks from `source`
    pub fn from_config(config: &Config, source: Arc<dyn ChunkSource>) -> Self {
        let dispatcher = StreamDispatcher::new(source)
            .with_read_timeout(config.read_timeout)
            .with_max_message(config.max_message_bytes);
        Listener::new(dispatcher, config.max_sessions)
    }

    /// Accept sessions until the endpoint is closed.
    pub async fn serve(&self, endpoint: quinn::Endpoint) {
        loop {
            // Wait for a session slot
            let permit = match self.session_limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let Some(incoming) = endpoint.accept().await else {
                debug!("Endpoint closed, no longer accepting sessions");
                return;
            };

            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                let peer = incoming.remote_address();
                match incoming.await {
                    Ok(connection) => {
                        debug!(peer = %peer, "New session");
                        handle_session(connection, dispatcher).await;
                    }
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "Session handshake failed");
                    }
                }
                drop(permit);
            });
        }
    }
}

/// Accept streams from one session until it closes.
///
/// Every stream runs on its own task; a failing stream leaves the session and
/// its other streams alone.
pub async fn handle_session(connection: quinn::Connection, dispatcher: StreamDispatcher) {
    let peer = connection.remote_address();

    loop {
        match connection.accept_bi().await {
            Ok((send, recv)) => {
                let stream_id = send.id();
                trace!(peer = %peer, stream = %stream_id, "New stream");

                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    match dispatcher.dispatch(recv, send).await {
                        Ok(outcome) => {
                            debug!(peer = %peer, stream = %stream_id, ?outcome, "Stream answered")
                        }
                        Err(e) => {
                            debug!(peer = %peer, stream = %stream_id, error = %e, "Stream error")
                        }
                    }
                });
            }
            Err(e) => {
                debug!(peer = %peer, reason = %e, "Session closed");
                return;
            }
        }
    }
}

/// Resolve the configured host and port to a socket address
pub async fn bind_address(config: &Config) -> Result<SocketAddr, ServerError> {
    let mut addrs = tokio::net::lookup_host((config.host.as_str(), config.port))
        .await
        .map_err(|source| ServerError::Resolve {
            host: config.host.clone(),
            port: config.port,
            source,
        })?;

    addrs.next().ok_or_else(|| ServerError::NoAddress {
        host: config.host.clone(),
        port: config.port,
    })
}

/// Line announcing that the peer accepts sessions
pub fn readiness_line(config: &Config) -> String {
    format!(
        "Listening on {} (alpn {})",
        config.endpoint_url(),
        tls::ALPN_PROTOCOL
    )
}

/// Run the peer until Ctrl+C or SIGTERM.
pub async fn run(config: Config) -> Result<(), ServerError> {
    let server_config = tls::load_server_config(&config)?;
    let addr = bind_address(&config).await?;
    let endpoint = quinn::Endpoint::server(server_config, addr)
        .map_err(|source| ServerError::Bind { addr, source })?;

    let assets = FixedAssetSource::new(config.asset.clone());
    info!(
        asset = %assets.known(),
        read_timeout = ?config.read_timeout,
        max_sessions = config.max_sessions,
        max_streams = config.max_streams,
        "Serving swarm streams"
    );
    let listener = Listener::from_config(&config, Arc::new(assets));
    // Supervisors wait for this line, so it bypasses the log filter.
    println!("{}", readiness_line(&config));

    tokio::select! {
        _ = listener.serve(endpoint.clone()) => {}
        result = shutdown_signal() => {
            if let Err(e) = result {
                error!(error = %e, "Signal handling failed, shutting down");
            }
        }
    }

    info!("Shutting down");
    endpoint.close(0u32.into(), b"shutdown");
    endpoint.wait_idle().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<(), ServerError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).map_err(ServerError::Signal)?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map_err(ServerError::Signal)?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map_err(ServerError::Signal)?;
    }
    Ok(())
}
