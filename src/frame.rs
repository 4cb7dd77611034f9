//! WebSocket data-frame codec.
//!
//! Decodes masked client→server frames from a byte stream and encodes
//! unmasked server→client frames. Only single, final data frames are
//! supported: fragmentation, control frames (ping/pong/close) and the
//! 64-bit extended length encoding are all rejected. See
//! <https://datatracker.ietf.org/doc/html/rfc6455#section-5.2> for the
//! frame layout.

use std::io::{self, Read};
use thiserror::Error;

/// Largest payload representable with the 16-bit extended length field.
///
/// Anything bigger would need the 64-bit extension, which this proxy does
/// not speak.
pub const MAX_PAYLOAD: usize = 65535;

/// First byte of every server→client frame: FIN set, opcode 1.
const FIN_TEXT: u8 = 0x81;

/// Error cases for frame decoding and encoding.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The FIN bit was clear; fragmented messages are unsupported.
    #[error("received a non-final frame (fragmentation is unsupported)")]
    NonFinal,
    /// A client→server frame arrived without the mask bit.
    #[error("received an unmasked client frame")]
    Unmasked,
    /// The frame used (or would need) the 64-bit extended length field.
    #[error("frame payload requires the 64-bit length extension (unsupported)")]
    UnsupportedFrameSize,
    #[error("i/o failure while reading frame: {0}")]
    Io(#[from] io::Error),
}

/// One decoded client data frame, already unmasked.
///
/// Frames are produced by [`decode`] straight off a socket and consumed
/// immediately by the caller; they are never retained across reads.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
}

/// Reads one masked client frame from `stream`.
///
/// Returns `Ok(None)` when the stream reaches end-of-file before a full
/// frame is available; callers treat that as "no more data, stop pumping".
/// Protocol violations (non-final, unmasked, oversized) are hard errors.
pub fn decode<R: Read>(stream: &mut R) -> Result<Option<Frame>, FrameError> {
    let mut header = [0u8; 2];
    if !read_full(stream, &mut header)? {
        return Ok(None);
    }

    if header[0] & 0x80 == 0 {
        return Err(FrameError::NonFinal);
    }
    if header[1] & 0x80 == 0 {
        return Err(FrameError::Unmasked);
    }

    let payload_len = match header[1] & 0x7f {
        127 => return Err(FrameError::UnsupportedFrameSize),
        126 => {
            let mut ext = [0u8; 2];
            if !read_full(stream, &mut ext)? {
                return Ok(None);
            }
            u16::from_be_bytes(ext) as usize
        }
        short => short as usize,
    };

    let mut mask = [0u8; 4];
    if !read_full(stream, &mut mask)? {
        return Ok(None);
    }

    let mut payload = vec![0u8; payload_len];
    if !read_full(stream, &mut payload)? {
        return Ok(None);
    }
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Some(Frame { payload }))
}

/// Encodes `payload` as a single unmasked server→client frame.
///
/// Payloads above [`MAX_PAYLOAD`] would need the 64-bit length extension
/// and are refused.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(FIN_TEXT);
    if payload.len() < 126 {
        frame.push(payload.len() as u8);
    } else if payload.len() <= MAX_PAYLOAD {
        frame.push(126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        return Err(FrameError::UnsupportedFrameSize);
    }
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Fills `buf` completely, retrying on `Interrupted`.
///
/// Returns `Ok(false)` if the stream ends before the buffer is full.
fn read_full<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
