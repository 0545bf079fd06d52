// src/core/protocol/frame_reader.rs

//! Raw frame reading for transparent forwarding: consumes exactly one
//! framed RESP object from a byte stream and yields its original bytes,
//! untouched, so the proxy can relay them without re-encoding.

use super::resp_value::{MAX_ARRAY_ELEMENTS, MAX_BULK_LEN, parse_length, scan_line};
use crate::core::BerylError;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Initial read buffer capacity. RESP bulk payloads can be large; the
/// buffer grows on demand beyond this.
pub const READ_BUFFER_CAPACITY: usize = 32 * 1024;

/// A buffered reader yielding one complete frame at a time as its exact
/// wire bytes.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        }
    }

    /// Reads the next complete frame.
    ///
    /// `Ok(None)` signals a clean EOF at a frame boundary; EOF mid-frame is
    /// `ConnectionClosed`. On a syntax error the buffered input is
    /// discarded before returning, so the caller may keep the session open
    /// while the peer resynchronizes by reconnecting.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, BerylError> {
        loop {
            match frame_len(&self.buf) {
                Ok(len) => return Ok(Some(self.buf.split_to(len).freeze())),
                Err(BerylError::IncompleteFrame) => {}
                Err(e) => {
                    self.buf.clear();
                    return Err(e);
                }
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(BerylError::ConnectionClosed);
            }
        }
    }
}

/// Computes the byte length of the single complete frame at the front of
/// `src`, validating its framing without materializing a value.
///
/// Header terminators must be CRLF and bulk/array lengths must be numeric;
/// the payloads of `+`/`-`/`:` lines are left to the typed parser. An array
/// frame is the header plus the raw bytes of `count` nested frames.
pub fn frame_len(src: &[u8]) -> Result<usize, BerylError> {
    let Some(&prefix) = src.first() else {
        return Err(BerylError::IncompleteFrame);
    };
    match prefix {
        b'+' | b'-' | b':' => {
            let (_, line_len) = scan_line(&src[1..])?;
            Ok(line_len + 1)
        }
        b'$' => {
            let (line, header_len) = scan_line(&src[1..])?;
            let declared = parse_length(line)?;
            if declared == -1 {
                return Ok(header_len + 1);
            }
            if declared > MAX_BULK_LEN {
                return Err(BerylError::SyntaxError);
            }
            let total = header_len + 1 + declared as usize + 2;
            if src.len() < total {
                return Err(BerylError::IncompleteFrame);
            }
            if &src[total - 2..total] != b"\r\n" {
                return Err(BerylError::SyntaxError);
            }
            Ok(total)
        }
        b'*' => {
            let (line, header_len) = scan_line(&src[1..])?;
            let count = parse_length(line)?;
            if count <= 0 {
                // `*-1` (null) and `*0` (empty) are header-only frames.
                return Ok(header_len + 1);
            }
            if count > MAX_ARRAY_ELEMENTS {
                return Err(BerylError::SyntaxError);
            }
            let mut total = header_len + 1;
            for _ in 0..count {
                total += frame_len(&src[total..])?;
            }
            Ok(total)
        }
        _ => Err(BerylError::SyntaxError),
    }
}
