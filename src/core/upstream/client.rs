// src/core/upstream/client.rs

//! A minimal request/reply client for speaking directly to an upstream
//! server: the `AUTH` handshake on dial, and the promotion procedure's
//! `INFO` / `SLAVEOF NO ONE` control traffic. Proxied client traffic never
//! goes through this type.

use super::dialer::Endpoint;
use crate::core::BerylError;
use crate::core::protocol::{RespValue, RespValueCodec};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct UpstreamClient {
    stream: TcpStream,
    codec: RespValueCodec,
    read_buf: BytesMut,
}

impl UpstreamClient {
    /// Connects to `endpoint` and, when it carries a password, performs the
    /// `AUTH` handshake. Any reply other than `+OK` drops the connection
    /// and fails with an invalid-password error.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, BerylError> {
        let stream = match tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect(endpoint.addr()),
        )
        .await
        {
            Ok(connected) => connected?,
            Err(_) => {
                return Err(BerylError::Io(Arc::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))));
            }
        };
        stream.set_nodelay(true).ok();

        let mut client = Self {
            stream,
            codec: RespValueCodec,
            read_buf: BytesMut::with_capacity(4096),
        };
        if let Some(password) = endpoint.auth.as_deref() {
            let auth = RespValue::command(vec![
                Bytes::from_static(b"AUTH"),
                Bytes::copy_from_slice(password.as_bytes()),
            ]);
            match client.request(auth).await? {
                RespValue::SimpleString(s) if s == "OK" => {}
                _ => return Err(BerylError::InvalidPassword),
            }
        }
        Ok(client)
    }

    /// Unwraps the handshaken connection for transparent forwarding. The
    /// server sends nothing unsolicited after the handshake, so the read
    /// buffer is empty at this point.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Sends one command frame and waits for a single reply frame.
    pub async fn request(&mut self, command: RespValue) -> Result<RespValue, BerylError> {
        let mut write_buf = BytesMut::new();
        self.codec.encode(command, &mut write_buf)?;
        self.stream.write_all(&write_buf).await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<RespValue, BerylError> {
        loop {
            if let Some(reply) = self.codec.decode(&mut self.read_buf)? {
                return Ok(reply);
            }
            let read = self.stream.read_buf(&mut self.read_buf);
            match tokio::time::timeout(REPLY_TIMEOUT, read).await {
                Ok(Ok(0)) => return Err(BerylError::ConnectionClosed),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(BerylError::Timeout),
            }
        }
    }

    /// Fetches the replication section of `INFO` as text.
    pub async fn info_replication(&mut self) -> Result<String, BerylError> {
        let reply = self
            .request(RespValue::command(["INFO", "replication"]))
            .await?;
        match reply {
            RespValue::BulkString(text) => Ok(String::from_utf8_lossy(&text).into_owned()),
            other => Err(BerylError::UnexpectedReply(other.summary())),
        }
    }

    /// `SLAVEOF NO ONE`: converts the replica into a standalone server. A
    /// rejection fails with the replica's error string unchanged.
    pub async fn demote(&mut self) -> Result<(), BerylError> {
        let reply = self
            .request(RespValue::command(["SLAVEOF", "NO", "ONE"]))
            .await?;
        match reply {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(message) => Err(BerylError::DemoteRefused(message)),
            other => Err(BerylError::UnexpectedReply(other.summary())),
        }
    }
}
