//! Length-prefixed frame codec.
//!
//! Every message to or from a worker is a 4-byte big-endian unsigned length
//! followed by exactly that many payload bytes. The codec is payload
//! agnostic; callers decide whether the bytes are a request, a response, or
//! a stream frame. Zero-length frames and frames above [`MAX_FRAME_LEN`]
//! are protocol errors.

use crate::error::WorkerError;
use std::io::{Read, Write};

/// Hard cap on a single frame payload: 10 MiB.
pub const MAX_FRAME_LEN: u32 = 10 * 1024 * 1024;

/// Write one frame: the big-endian length header, then the payload.
pub fn write_frame<W: Write>(sink: &mut W, payload: &[u8]) -> Result<(), WorkerError> {
    if payload.is_empty() {
        return Err(WorkerError::EmptyFrame);
    }
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(WorkerError::FrameTooLarge(payload.len() as u32));
    }
    let header = (payload.len() as u32).to_be_bytes();
    sink.write_all(&header)?;
    sink.write_all(payload)?;
    sink.flush()?;
    Ok(())
}

/// Read one frame, retrying short reads until the declared length is
/// delivered. End-of-stream mid-frame surfaces as an `UnexpectedEof` I/O
/// error, which the worker layer classifies as a broken pipe.
pub fn read_frame<R: Read>(source: &mut R) -> Result<Vec<u8>, WorkerError> {
    let mut header = [0u8; 4];
    source.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header);

    if len == 0 {
        return Err(WorkerError::EmptyFrame);
    }
    if len > MAX_FRAME_LEN {
        return Err(WorkerError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    source.read_exact(&mut payload)?;
    Ok(payload)
}
