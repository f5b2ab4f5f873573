//! Newline-framed codec for the worker's stdio.
//!
//! Outgoing commands are written as one line each. Incoming output is
//! reassembled into lines: chunks may split a response anywhere, so partial
//! bytes stay buffered until their terminator arrives. A fresh codec is used
//! for each worker lifetime, which means no line can span a restart.

use std::io;

use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::Command;

/// Line reassembler and command encoder.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Bytes before this offset are known not to contain a terminator.
    scanned: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = src.len();
                return Ok(None);
            };

            let raw = src.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            // Lossy so that garbage surfaces as a malformed response instead
            // of tearing down the stream.
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            tracing::trace!(line_bytes = line.len(), "Decoded worker line");
            return Ok(Some(line.to_string()));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if !src.is_empty() {
            tracing::debug!(
                partial_bytes = src.len(),
                "Discarding unterminated worker output at end of stream"
            );
            src.clear();
        }
        self.scanned = 0;
        Ok(None)
    }
}

impl Encoder<&Command> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.as_str().as_bytes();
        dst.reserve(line.len() + 1);
        dst.put_slice(line);
        dst.put_u8(b'\n');
        Ok(())
    }
}
