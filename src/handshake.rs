//! The opening handshake: HTTP Upgrade validation and Accept-key derivation.

use std::io::{Read, Write};

use log::{debug, warn};

use crate::base64;
use crate::error::WsError;
use crate::sha1;

const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const KEY_HEADER: &str = "sec-websocket-key:";

/// Reads the HTTP Upgrade request off `stream`, validates it, and writes
/// back the `101 Switching Protocols` response.
///
/// On any failure, writes a best-effort `400 Bad Request` and returns the
/// error — the caller is expected to close the stream afterwards. Neither
/// `on_open` nor `on_close` is fired for a failed handshake.
pub fn perform<S: Read + Write>(stream: &mut S, max_request_size: usize) -> Result<(), WsError> {
    match run_handshake(stream, max_request_size) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("handshake failed: {}", e);
            // Best-effort: a broken/adversarial peer may not be reading anymore.
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            Err(e)
        }
    }
}

fn run_handshake<S: Read + Write>(stream: &mut S, max_request_size: usize) -> Result<(), WsError> {
    let request = read_request_headers(stream, max_request_size)?;
    let key = extract_key(&request)?;
    debug!("handshake key: {}", key);

    let accept = accept_token(key);

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept
    );
    stream
        .write_all(response.as_bytes())
        .map_err(WsError::SendFailed)?;
    Ok(())
}

/// Computes `base64(SHA1(key + GUID))`, the RFC 6455 accept token.
pub fn accept_token(key: &str) -> String {
    let mut message = key.as_bytes().to_vec();
    message.extend_from_slice(GUID);
    base64::encode(&sha1::hash(&message))
}

/// Reads bytes from `stream` until `\r\n\r\n` appears or `max_request_size`
/// is exceeded, then returns the request as a lossily-decoded `String`
/// (headers are expected to be ASCII; non-ASCII bytes would fail the header
/// lookup below anyway).
fn read_request_headers<S: Read>(stream: &mut S, max_request_size: usize) -> Result<String, WsError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];

    loop {
        if contains_double_crlf(&buf) {
            break;
        }
        if buf.len() >= max_request_size {
            return Err(WsError::HandshakeFailed(format!(
                "request exceeds {} byte cap",
                max_request_size
            )));
        }

        let n = stream.read(&mut chunk).map_err(WsError::Io)?;
        if n == 0 {
            return Err(WsError::HandshakeFailed(
                "connection closed before the request headers completed".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn contains_double_crlf(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n")
}

/// Locates `Sec-WebSocket-Key` case-insensitively and returns its trimmed
/// value.
fn extract_key(request: &str) -> Result<&str, WsError> {
    for line in request.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix(KEY_HEADER) {
            let value_start = line.len() - rest.len();
            return Ok(line[value_start..].trim());
        }
    }
    Err(WsError::HandshakeFailed(
        "Sec-WebSocket-Key header not found".to_string(),
    ))
}
