// src/core/promotion/command.rs

//! Parsing of the `PROMOTE <ip> <port> [auth] [timeout-ms]` argument forms.

use crate::core::BerylError;
use crate::core::protocol::RespValue;
use crate::core::upstream::Endpoint;
use std::time::Duration;

/// Applied when the client omits the trailing timeout argument.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// A parsed promotion request. Lives only for the duration of the
/// procedure it triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteRequest {
    pub host: String,
    pub port: u16,
    pub auth: Option<String>,
    pub timeout: Duration,
}

impl PromoteRequest {
    /// Parses the arguments following the command name.
    ///
    /// Accepted arities: 2 (ip, port), 3 (ip, port, then a timeout when the
    /// extra argument is all digits, otherwise a password), and 4 (ip,
    /// port, auth, timeout-ms). An empty password argument means no auth.
    pub fn parse(args: &[RespValue]) -> Result<Self, BerylError> {
        let words = bulk_words(args)?;
        if words.len() < 2 || words.len() > 4 {
            return Err(BerylError::WrongArgumentCount("promote".to_string()));
        }

        let host = utf8_word(words[0], "ip")?;
        let port: u16 = utf8_word(words[1], "port")?
            .parse()
            .map_err(|_| BerylError::InvalidRequest("invalid port".to_string()))?;

        let mut auth = None;
        let mut timeout = DEFAULT_TIMEOUT;
        match words.len() {
            3 => {
                if is_all_digits(words[2]) {
                    timeout = parse_timeout(words[2])?;
                } else {
                    auth = non_empty(utf8_word(words[2], "auth")?);
                }
            }
            4 => {
                auth = non_empty(utf8_word(words[2], "auth")?);
                if !is_all_digits(words[3]) {
                    return Err(BerylError::InvalidRequest("invalid timeout".to_string()));
                }
                timeout = parse_timeout(words[3])?;
            }
            _ => {}
        }

        Ok(Self {
            host,
            port,
            auth,
            timeout,
        })
    }

    /// The endpoint the proxy will point at once the promotion completes.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            auth: self.auth.clone(),
        }
    }
}

fn bulk_words(args: &[RespValue]) -> Result<Vec<&[u8]>, BerylError> {
    args.iter()
        .map(|arg| match arg {
            RespValue::BulkString(bytes) => Ok(&bytes[..]),
            _ => Err(BerylError::WrongArgumentCount("promote".to_string())),
        })
        .collect()
}

fn utf8_word(word: &[u8], what: &str) -> Result<String, BerylError> {
    std::str::from_utf8(word)
        .map(str::to_string)
        .map_err(|_| BerylError::InvalidRequest(format!("invalid {what}")))
}

fn non_empty(word: String) -> Option<String> {
    if word.is_empty() { None } else { Some(word) }
}

fn is_all_digits(word: &[u8]) -> bool {
    !word.is_empty() && word.iter().all(u8::is_ascii_digit)
}

fn parse_timeout(word: &[u8]) -> Result<Duration, BerylError> {
    let millis: u64 = std::str::from_utf8(word)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| BerylError::InvalidRequest("invalid timeout".to_string()))?;
    Ok(Duration::from_millis(millis))
}
