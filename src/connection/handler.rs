// src/connection/handler.rs

//! Defines the `SessionHandler` which manages the full lifecycle of a
//! proxied client connection.

use crate::core::BerylError;
use crate::core::promotion::{self, PromoteRequest};
use crate::core::protocol::{FrameReader, RespValue, parse_value};
use crate::core::upstream::{Dialer, RegisteredUpstream, TrackedUpstream, UpstreamRegistry};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type SharedClientWriter = Arc<AsyncMutex<OwnedWriteHalf>>;

/// Lifecycle of a session. `Closed` is terminal and is reachable from
/// either earlier state (a failed dial closes a session that never opened).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    New,
    Open,
    Closed,
}

/// One accepted client: its socket halves, the lazily opened upstream
/// connection, and the background pump streaming upstream bytes back.
pub struct SessionHandler {
    session_id: u64,
    peer: SocketAddr,
    reader: FrameReader<OwnedReadHalf>,
    client_writer: SharedClientWriter,
    dialer: Arc<Dialer>,
    registry: Arc<UpstreamRegistry>,
    upstream: Option<TrackedUpstream>,
    pump: Option<JoinHandle<()>>,
    state: SessionState,
}

impl SessionHandler {
    pub fn new(
        client: TcpStream,
        peer: SocketAddr,
        session_id: u64,
        dialer: Arc<Dialer>,
        registry: Arc<UpstreamRegistry>,
    ) -> Self {
        let (read_half, write_half) = client.into_split();
        Self {
            session_id,
            peer,
            reader: FrameReader::new(read_half),
            client_writer: Arc::new(AsyncMutex::new(write_half)),
            dialer,
            registry,
            upstream: None,
            pump: None,
            state: SessionState::New,
        }
    }

    /// Runs the session to completion; always leaves it closed.
    pub async fn run(mut self) {
        match self.open().await {
            Ok(kill_rx) => {
                if let Err(e) = self.serve(kill_rx).await {
                    debug!(session = self.session_id, peer = %self.peer, error = %e, "session ended with error");
                }
            }
            Err(e) => {
                debug!(session = self.session_id, peer = %self.peer, error = %e, "failed to open upstream");
            }
        }
        self.close().await;
    }

    /// Dials the upstream, registers the connection, and starts the reply
    /// pump. On a dial failure the client gets a RESP error before the
    /// session closes from `New`.
    async fn open(&mut self) -> Result<broadcast::Receiver<()>, BerylError> {
        let stream = match self.dialer.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                self.write_client_error(&e).await;
                return Err(e);
            }
        };
        let RegisteredUpstream {
            handle,
            reader,
            serve_kill,
            pump_kill,
        } = Arc::clone(&self.registry).register(stream);

        self.pump = Some(tokio::spawn(pump(
            reader,
            Arc::clone(&self.client_writer),
            pump_kill,
            self.session_id,
        )));
        self.upstream = Some(handle);
        self.state = SessionState::Open;
        debug!(session = self.session_id, peer = %self.peer, "proxy session opened");
        Ok(serve_kill)
    }

    /// The main loop: read one framed command from the client, intercept
    /// `PROMOTE`, forward everything else verbatim. Replies never pass
    /// through here; the pump streams them back independently.
    async fn serve(&mut self, mut kill_rx: broadcast::Receiver<()>) -> Result<(), BerylError> {
        loop {
            tokio::select! {
                _ = kill_rx.recv() => {
                    debug!(session = self.session_id, "upstream severed, closing session");
                    return Ok(());
                }
                frame = self.reader.read_frame() => {
                    match frame {
                        Ok(Some(bytes)) => {
                            if !self.dispatch(bytes).await? {
                                return Ok(());
                            }
                        }
                        Ok(None) => {
                            debug!(session = self.session_id, peer = %self.peer, "client disconnected");
                            return Ok(());
                        }
                        // The client keeps its session on framing loss; it
                        // is expected to reconnect to resynchronize.
                        Err(BerylError::SyntaxError) => {
                            self.write_client_error(&BerylError::SyntaxError).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Routes one client frame. Returns `false` when the session should
    /// end (every `PROMOTE`, successful or not, ends it).
    async fn dispatch(&mut self, frame: Bytes) -> Result<bool, BerylError> {
        let value = match parse_value(&frame) {
            Ok((value, _)) => value,
            Err(_) => {
                self.write_client_error(&BerylError::SyntaxError).await;
                return Ok(true);
            }
        };

        if let RespValue::Array(items) = &value {
            if let Some(RespValue::BulkString(name)) = items.first() {
                if name.eq_ignore_ascii_case(b"promote") {
                    self.handle_promote(&items[1..]).await;
                    return Ok(false);
                }
            }
        }

        debug!(session = self.session_id, command = %value.summary(), "forwarding");
        if let Some(upstream) = &self.upstream {
            upstream.write_all(&frame).await?;
        }
        Ok(true)
    }

    async fn handle_promote(&mut self, args: &[RespValue]) {
        let request = match PromoteRequest::parse(args) {
            Ok(request) => request,
            Err(e) => {
                self.write_client_error(&e).await;
                return;
            }
        };
        info!(
            session = self.session_id,
            replica = %request.endpoint(),
            "client requested promotion"
        );
        match promotion::run(&self.dialer, &self.registry, &self.client_writer, &request).await {
            // The procedure already acknowledged the client.
            Ok(()) => {}
            Err(e) => {
                warn!(session = self.session_id, error = %e, "promotion failed");
                self.write_client_error(&e).await;
            }
        }
    }

    async fn write_client_error(&self, err: &BerylError) {
        let reply = client_error_reply(err);
        let mut writer = self.client_writer.lock().await;
        let _ = writer.write_all(&reply).await;
    }

    /// Idempotent teardown: closes the tracked upstream (which deregisters
    /// it), stops the pump, and shuts the client socket.
    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        if let Some(upstream) = self.upstream.take() {
            upstream.close().await;
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let _ = self.client_writer.lock().await.shutdown().await;
        debug!(session = self.session_id, peer = %self.peer, "proxy session closed");
    }
}

/// Renders an error as the RESP reply the client sees. A refused demote
/// already carries a full error string from the replica and passes through
/// with only the `-` prefix; everything else is wrapped as `-ERR`.
fn client_error_reply(err: &BerylError) -> Vec<u8> {
    match err {
        BerylError::DemoteRefused(message) => format!("-{message}\r\n").into_bytes(),
        other => format!("-ERR {other}\r\n").into_bytes(),
    }
}

/// Streams upstream bytes to the client until the upstream closes, errors,
/// or the connection is severed. Carries replies and any asynchronous
/// traffic (pub/sub pushes, MONITOR output) transparently. Never closes
/// the client socket itself; session teardown owns that.
async fn pump(
    mut upstream: OwnedReadHalf,
    client: SharedClientWriter,
    mut kill_rx: broadcast::Receiver<()>,
    session_id: u64,
) {
    let mut buf = BytesMut::with_capacity(16 * 1024);
    loop {
        tokio::select! {
            _ = kill_rx.recv() => break,
            read = upstream.read_buf(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let chunk = buf.split().freeze();
                        let mut writer = client.lock().await;
                        if writer.write_all(&chunk).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!(session = session_id, "reply pump finished");
}
