//! Line-oriented reader for the control channel.
//!
//! TCP hands us arbitrary byte chunks. [`FrameReader::receive_frame`] only
//! returns bytes that end on a record boundary, so a record is never split
//! across two dispatch passes. Whatever follows the last line break stays
//! buffered for the next call.

use quadbridge_types::BridgeError;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on buffered bytes without a line break before the stream is
/// considered out of step.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 1024;

pub struct FrameReader<R> {
    inner: R,
    pending: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            eof: false,
        }
    }

    /// Block until at least one complete record is buffered, then return all
    /// complete records as raw bytes. Decoding is left to the record parser
    /// so one garbled record cannot poison its neighbours.
    ///
    /// An empty chunk means the peer closed the connection. A partial record
    /// still buffered at close is returned once before that.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Receive`] on an I/O failure or when more than
    /// [`MAX_PENDING_BYTES`] accumulate without a line break.
    pub async fn receive_frame(&mut self) -> Result<Vec<u8>, BridgeError> {
        loop {
            if let Some(pos) = self.pending.iter().rposition(|&b| b == b'\n') {
                let rest = self.pending.split_off(pos + 1);
                return Ok(std::mem::replace(&mut self.pending, rest));
            }
            if self.eof {
                return Ok(std::mem::take(&mut self.pending));
            }
            if self.pending.len() > MAX_PENDING_BYTES {
                return Err(BridgeError::Receive(format!(
                    "{} bytes buffered without a line break",
                    self.pending.len()
                )));
            }

            let mut buf = [0u8; READ_CHUNK];
            let n = self
                .inner
                .read(&mut buf)
                .await
                .map_err(|e| BridgeError::Receive(e.to_string()))?;
            if n == 0 {
                self.eof = true;
            } else {
                self.pending.extend_from_slice(&buf[..n]);
            }
        }
    }
}
