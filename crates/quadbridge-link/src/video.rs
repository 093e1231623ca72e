//! Video relay.
//!
//! The robot streams JPEG frames on a second TCP port, each prefixed with
//! its length as a little-endian `u32`. The bridge does not decode them; it
//! keeps the most recent valid frame for `GET /camera/image`.
//!
//! Capture is gated: the receiver stores a frame only while the capture gate
//! is armed and disarms it when it does, and [`run_capture_pump`] re-arms the
//! gate on a fixed interval for as long as the session is connected. This caps
//! the capture rate at one frame per poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use quadbridge_types::BridgeError;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::state::StateStore;

/// Largest frame accepted from the video port.
pub const MAX_VIDEO_FRAME_BYTES: usize = 8 * 1024 * 1024;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Latest captured frame plus the capture gate.
#[derive(Debug, Default)]
pub struct VideoFeed {
    latest: RwLock<Option<Bytes>>,
    capture_gate: AtomicBool,
}

impl VideoFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent captured JPEG, if any. Cloning the handle does not
    /// copy the image.
    pub fn latest_image(&self) -> Option<Bytes> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_capture_armed(&self) -> bool {
        self.capture_gate.load(Ordering::Acquire)
    }

    /// Arm the gate. Returns `true` if it was previously disarmed.
    pub fn arm_capture(&self) -> bool {
        !self.capture_gate.swap(true, Ordering::AcqRel)
    }

    /// Store `frame` if the gate is armed, disarming it. Returns whether the
    /// frame was kept.
    pub fn offer(&self, frame: Vec<u8>) -> bool {
        if self
            .capture_gate
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Bytes::from(frame));
        true
    }
}

/// `true` when `bytes` starts with a JPEG SOI marker and ends with EOI.
pub fn is_valid_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes.starts_with(&JPEG_SOI) && bytes.ends_with(&JPEG_EOI)
}

/// Read one length-prefixed frame. `Ok(None)` on a clean close between frames.
pub async fn read_video_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, BridgeError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BridgeError::Receive(e.to_string())),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_VIDEO_FRAME_BYTES {
        return Err(BridgeError::Receive(format!(
            "video frame of {len} bytes exceeds the {MAX_VIDEO_FRAME_BYTES} byte limit"
        )));
    }
    let mut frame = vec![0u8; len];
    reader
        .read_exact(&mut frame)
        .await
        .map_err(|e| BridgeError::Receive(e.to_string()))?;
    Ok(Some(frame))
}

/// Pull frames from `reader` into `feed` until close, error, or shutdown.
pub async fn relay_frames<R>(reader: &mut R, feed: &VideoFeed, shutdown: &mut watch::Receiver<bool>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            result = read_video_frame(reader) => result,
        };
        match frame {
            Ok(Some(frame)) if is_valid_jpeg(&frame) => {
                if feed.offer(frame) {
                    debug!("captured video frame");
                }
            }
            Ok(Some(frame)) => debug!(len = frame.len(), "discarding frame without JPEG markers"),
            Ok(None) => {
                info!("video stream closed by robot");
                return;
            }
            Err(e) => {
                warn!(error = %e, "video stream failed");
                return;
            }
        }
    }
}

/// Connect to the robot's video port and relay frames into `feed`.
///
/// A failed connect is logged and ends the task; the control session is not
/// affected.
pub async fn run_video_receiver(
    feed: Arc<VideoFeed>,
    addr: String,
    connect_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let connect = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr));
    let stream = tokio::select! {
        biased;
        _ = shutdown.changed() => return,
        result = connect => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(addr = %addr, error = %e, "video connect failed");
                return;
            }
            Err(_) => {
                warn!(addr = %addr, "video connect timed out");
                return;
            }
        },
    };
    info!(addr = %addr, "video stream connected");
    let mut reader = BufReader::new(stream);
    relay_frames(&mut reader, &feed, &mut shutdown).await;
}

/// Re-arm the capture gate every `interval` while the session stays connected.
pub async fn run_capture_pump(
    feed: Arc<VideoFeed>,
    state: StateStore,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {}
        }
        if !state.is_connected() {
            return;
        }
        feed.arm_capture();
    }
}
