// src/core/protocol/resp_value.rs

//! The typed RESP value tree, its parser, and the corresponding
//! `Encoder`/`Decoder` for network communication.

use crate::core::BerylError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF sequence terminating every RESP line.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits to reject hostile or corrupted length headers
// before they turn into allocations.
pub(crate) const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
pub(crate) const MAX_ARRAY_ELEMENTS: i64 = 1024 * 1024;

/// One RESP value. `Null` (the null bulk string, `$-1`) is distinct from
/// the empty bulk string, and `NullArray` (`*-1`) from the empty array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    Array(Vec<RespValue>),
    NullArray,
}

impl RespValue {
    /// Builds the standard client command form: an array of bulk strings.
    pub fn command<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(
            parts
                .into_iter()
                .map(|part| RespValue::BulkString(part.into()))
                .collect(),
        )
    }

    /// Encodes this value into a freshly allocated buffer.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_value(self, &mut buf);
        buf.freeze()
    }

    /// Lossy one-line rendering used when logging forwarded traffic.
    pub fn summary(&self) -> String {
        match self {
            RespValue::SimpleString(s) | RespValue::Error(s) => format!("{s:?}"),
            RespValue::Integer(i) => i.to_string(),
            RespValue::BulkString(b) => format!("{:?}", String::from_utf8_lossy(b)),
            RespValue::Null | RespValue::NullArray => "(null)".to_string(),
            RespValue::Array(items) => {
                let words: Vec<String> = items.iter().map(RespValue::summary).collect();
                words.join(" ")
            }
        }
    }
}

fn encode_value(value: &RespValue, dst: &mut BytesMut) {
    match value {
        RespValue::SimpleString(s) => {
            dst.extend_from_slice(b"+");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespValue::Error(s) => {
            dst.extend_from_slice(b"-");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespValue::Integer(i) => {
            dst.extend_from_slice(b":");
            dst.extend_from_slice(i.to_string().as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespValue::BulkString(b) => {
            dst.extend_from_slice(b"$");
            dst.extend_from_slice(b.len().to_string().as_bytes());
            dst.extend_from_slice(CRLF);
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespValue::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespValue::NullArray => dst.extend_from_slice(b"*-1\r\n"),
        RespValue::Array(items) => {
            dst.extend_from_slice(b"*");
            dst.extend_from_slice(items.len().to_string().as_bytes());
            dst.extend_from_slice(CRLF);
            for item in items {
                encode_value(item, dst);
            }
        }
    }
}

/// A `tokio_util::codec` implementation for `RespValue` frames.
#[derive(Debug, Default)]
pub struct RespValueCodec;

impl Encoder<RespValue> for RespValueCodec {
    type Error = BerylError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_value(&item, dst);
        Ok(())
    }
}

impl Decoder for RespValueCodec {
    type Item = RespValue;
    type Error = BerylError;

    /// Returns `Ok(None)` while the buffer holds only a partial frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_value(src) {
            Ok((value, len)) => {
                src.advance(len);
                Ok(Some(value))
            }
            Err(BerylError::IncompleteFrame) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Parses exactly one value from the front of `src`, returning it together
/// with the number of bytes it occupied.
///
/// `Err(IncompleteFrame)` means the buffer ends mid-frame; any other error
/// is a definitive syntax failure.
pub fn parse_value(src: &[u8]) -> Result<(RespValue, usize), BerylError> {
    let Some(&prefix) = src.first() else {
        return Err(BerylError::IncompleteFrame);
    };
    match prefix {
        b'+' => parse_simple_string(src),
        b'-' => parse_error(src),
        b':' => parse_integer(src),
        b'$' => parse_bulk_string(src),
        b'*' => parse_array(src),
        _ => Err(BerylError::SyntaxError),
    }
}

/// Scans one header line. The terminator must be CRLF: an LF not preceded
/// by CR is malformed, not merely incomplete.
pub(crate) fn scan_line(src: &[u8]) -> Result<(&[u8], usize), BerylError> {
    match src.iter().position(|&b| b == b'\n') {
        None => Err(BerylError::IncompleteFrame),
        Some(0) => Err(BerylError::SyntaxError),
        Some(pos) if src[pos - 1] != b'\r' => Err(BerylError::SyntaxError),
        Some(pos) => Ok((&src[..pos - 1], pos + 1)),
    }
}

/// Parses a bulk-string length or array count. Digits only; a leading `-`
/// is accepted solely as the exact token `-1`.
pub(crate) fn parse_length(line: &[u8]) -> Result<i64, BerylError> {
    if line == b"-1" {
        return Ok(-1);
    }
    if line.is_empty() {
        return Err(BerylError::SyntaxError);
    }
    let mut n: i64 = 0;
    for &b in line {
        if !b.is_ascii_digit() {
            return Err(BerylError::SyntaxError);
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add((b - b'0') as i64))
            .ok_or(BerylError::SyntaxError)?;
    }
    Ok(n)
}

/// Parses a signed 64-bit integer payload. `-0` decodes to `0`; anything
/// outside the i64 range is a syntax error.
fn parse_i64(line: &[u8]) -> Result<i64, BerylError> {
    let (negative, digits) = match line.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, line),
    };
    if digits.is_empty() {
        return Err(BerylError::SyntaxError);
    }
    // Accumulate negated so that i64::MIN parses without overflow.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(BerylError::SyntaxError);
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub((b - b'0') as i64))
            .ok_or(BerylError::SyntaxError)?;
    }
    if negative {
        Ok(n)
    } else {
        n.checked_neg().ok_or(BerylError::SyntaxError)
    }
}

fn parse_simple_string(src: &[u8]) -> Result<(RespValue, usize), BerylError> {
    let (line, len) = scan_line(&src[1..])?;
    if line.contains(&b'\r') {
        return Err(BerylError::SyntaxError);
    }
    Ok((
        RespValue::SimpleString(String::from_utf8_lossy(line).into_owned()),
        len + 1,
    ))
}

fn parse_error(src: &[u8]) -> Result<(RespValue, usize), BerylError> {
    let (line, len) = scan_line(&src[1..])?;
    if line.contains(&b'\r') {
        return Err(BerylError::SyntaxError);
    }
    Ok((
        RespValue::Error(String::from_utf8_lossy(line).into_owned()),
        len + 1,
    ))
}

fn parse_integer(src: &[u8]) -> Result<(RespValue, usize), BerylError> {
    let (line, len) = scan_line(&src[1..])?;
    Ok((RespValue::Integer(parse_i64(line)?), len + 1))
}

fn parse_bulk_string(src: &[u8]) -> Result<(RespValue, usize), BerylError> {
    let (line, header_len) = scan_line(&src[1..])?;
    let declared = parse_length(line)?;
    if declared == -1 {
        return Ok((RespValue::Null, header_len + 1));
    }
    if declared > MAX_BULK_LEN {
        return Err(BerylError::SyntaxError);
    }
    let body_start = header_len + 1;
    let body_end = body_start + declared as usize;
    if src.len() < body_end + CRLF_LEN {
        return Err(BerylError::IncompleteFrame);
    }
    if &src[body_end..body_end + CRLF_LEN] != CRLF {
        return Err(BerylError::SyntaxError);
    }
    Ok((
        RespValue::BulkString(Bytes::copy_from_slice(&src[body_start..body_end])),
        body_end + CRLF_LEN,
    ))
}

fn parse_array(src: &[u8]) -> Result<(RespValue, usize), BerylError> {
    let (line, header_len) = scan_line(&src[1..])?;
    let count = parse_length(line)?;
    if count == -1 {
        return Ok((RespValue::NullArray, header_len + 1));
    }
    if count > MAX_ARRAY_ELEMENTS {
        return Err(BerylError::SyntaxError);
    }
    let mut items = Vec::with_capacity(count.min(64) as usize);
    let mut cursor = header_len + 1;
    for _ in 0..count {
        let (item, item_len) = parse_value(&src[cursor..])?;
        items.push(item);
        cursor += item_len;
    }
    Ok((RespValue::Array(items), cursor))
}
