//! Server side of the RFC 6455 opening handshake.
//!
//! The client sends an HTTP Upgrade request; we pull out the
//! `Sec-WebSocket-Key` header, derive the accept token and answer with a
//! fixed `101 Switching Protocols` block. No other header is consumed and
//! nothing persists across handshakes.

use base64::Engine;
use sha1::Digest;
use std::io::{Read, Write};
use thiserror::Error;

/// Fixed GUID appended to the client key before hashing.
/// <https://datatracker.ietf.org/doc/html/rfc6455#section-1.3>
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &[u8] = b"Sec-WebSocket-Key:";

/// Upper bound on the request block we are willing to read.
const REQUEST_LIMIT: usize = 8192;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("request carries no Sec-WebSocket-Key header")]
    MissingKey,
    #[error("connection closed before a request was received")]
    ConnectionClosed,
    #[error("i/o failure during handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the opening handshake on `stream`.
///
/// Performs one bounded read of the request block and writes the 101
/// response. On any failure the caller must close the connection; partial
/// handshakes are not resumable.
pub fn perform<S: Read + Write>(stream: &mut S) -> Result<(), HandshakeError> {
    let mut buf = [0u8; REQUEST_LIMIT];
    let n = stream.read(&mut buf)?;
    if n == 0 {
        return Err(HandshakeError::ConnectionClosed);
    }

    let key = extract_key(&buf[..n]).ok_or(HandshakeError::MissingKey)?;
    let accept = accept_key(key);

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()?;
    Ok(())
}

/// Derives the `Sec-WebSocket-Accept` value for a client key.
///
/// Pure function: `Base64(SHA1(key + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = sha1::Sha1::default();
    hasher.update(client_key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::prelude::BASE64_STANDARD.encode(digest)
}

/// Locates the key header and returns its value, trimmed.
///
/// The value runs from the end of the header name to the first CR or LF.
fn extract_key(request: &[u8]) -> Option<&str> {
    let at = request
        .windows(KEY_HEADER.len())
        .position(|window| window == KEY_HEADER)?;
    let rest = &request[at + KEY_HEADER.len()..];
    let end = rest
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(rest.len());
    let value = std::str::from_utf8(&rest[..end]).ok()?.trim();
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// In-memory stand-in for a socket: reads from a fixed request,
    /// records everything written.
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn new(request: &[u8]) -> Self {
            MockStream {
                input: Cursor::new(request.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    // The canonical example from RFC 6455 section 1.3.
    #[test]
    fn accept_key_known_answer() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn perform_writes_switching_protocols() {
        let request = b"GET / HTTP/1.1\r\n\
                        Host: localhost\r\n\
                        Upgrade: websocket\r\n\
                        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                        \r\n";
        let mut stream = MockStream::new(request);
        perform(&mut stream).unwrap();

        let response = String::from_utf8(stream.output).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains(
            "Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"
        ));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn perform_fails_without_key() {
        let mut stream = MockStream::new(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(matches!(
            perform(&mut stream),
            Err(HandshakeError::MissingKey)
        ));
        assert!(stream.output.is_empty());
    }

    #[test]
    fn perform_fails_on_immediate_eof() {
        let mut stream = MockStream::new(b"");
        assert!(matches!(
            perform(&mut stream),
            Err(HandshakeError::ConnectionClosed)
        ));
    }

    #[test]
    fn extract_key_stops_at_line_break() {
        let req = b"Sec-WebSocket-Key: abc123\r\nOther: y\r\n";
        assert_eq!(extract_key(req), Some("abc123"));
        // LF-only line endings still terminate the value.
        let req = b"Sec-WebSocket-Key: abc123\nOther: y\n";
        assert_eq!(extract_key(req), Some("abc123"));
    }

    #[test]
    fn extract_key_rejects_empty_value() {
        assert_eq!(extract_key(b"Sec-WebSocket-Key: \r\n"), None);
    }
}
