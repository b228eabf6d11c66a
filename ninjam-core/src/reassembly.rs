//! Stream reassembly: turns arbitrarily split inbound bytes into complete frames.
//!
//! At most one backlog buffer is held between calls. It holds the unconsumed tail of the last
//! chunk, starting at a message header, so the header is parsed again once more bytes arrive.

use std::ops::ControlFlow;

use crate::wire::{decode_frame, Frame, FrameDecodeError, HEADER_SIZE};

#[derive(Debug, Default)]
pub struct StreamReassembler {
    backlog: Option<Vec<u8>>,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every complete frame they finish, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, FrameDecodeError> {
        let mut frames = Vec::new();
        self.feed_with(bytes, |frame| {
            frames.push(frame);
            ControlFlow::Continue(())
        })?;
        Ok(frames)
    }

    /// Feed raw bytes, handing each complete frame to `handle` as soon as it is parsed.
    /// If `handle` breaks, the rest of this buffer is dropped and no backlog is kept.
    ///
    /// A header declaring an oversized payload fails the call. Only that header is kept,
    /// so every later call fails the same way until `clear`.
    pub fn feed_with<F>(&mut self, bytes: &[u8], mut handle: F) -> Result<(), FrameDecodeError>
    where
        F: FnMut(Frame) -> ControlFlow<()>,
    {
        let mut merged = self.backlog.take();
        if let Some(backlog) = merged.as_mut() {
            backlog.extend_from_slice(bytes);
        }
        let buf: &[u8] = merged.as_deref().unwrap_or(bytes);

        let mut pos = 0;
        while pos < buf.len() {
            match decode_frame(&buf[pos..]) {
                Ok((frame, consumed)) => {
                    pos += consumed;
                    if handle(frame).is_break() {
                        return Ok(());
                    }
                }
                Err(FrameDecodeError::NeedMore) => {
                    // Starting at 0 the whole buffer is the backlog; keep it without copying.
                    let tail = (pos > 0).then(|| buf[pos..].to_vec());
                    self.backlog =
                        Some(tail.unwrap_or_else(|| merged.unwrap_or_else(|| bytes.to_vec())));
                    return Ok(());
                }
                Err(e) => {
                    self.backlog = Some(buf[pos..pos + HEADER_SIZE].to_vec());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Bytes held over from previous calls.
    pub fn backlog(&self) -> Option<&[u8]> {
        self.backlog.as_deref()
    }

    pub fn clear(&mut self) {
        self.backlog = None;
    }
}
