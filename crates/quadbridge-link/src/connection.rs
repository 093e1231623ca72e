//! [`RobotLink`] – owner of the single control session to the robot.
//!
//! # Lifecycle
//!
//! * [`RobotLink::connect`] opens the control socket, publishes
//!   `connected = true`, and starts three tasks for the session: the
//!   telemetry receive loop, the video receiver, and the capture pump.
//! * [`RobotLink::disconnect`] signals those tasks, half-closes the socket,
//!   and waits for them to finish. Calling it without a live session is a
//!   no-op.
//! * Any receive failure, and any send failure, tears the session down from
//!   the inside. A write the robot does not drain within
//!   [`LinkConfig::send_timeout`] counts as a send failure. Nothing
//!   reconnects automatically.
//!
//! A send in flight gives up as soon as its session ends, so `disconnect`
//! never waits behind a writer the robot has stopped reading from.
//!
//! Connect and disconnect are serialised by an async lifecycle lock, so only
//! one transition is ever in flight. The session slot itself sits behind a
//! short synchronous lock that is never held across an await; that is what
//! lets a dying receive loop release its own session while `disconnect` is
//! waiting for it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use quadbridge_types::{BridgeError, Command, CommandFrame};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::framing::FrameReader;
use crate::receiver::{LoopExit, run_receive_loop};
use crate::state::StateStore;
use crate::video::{VideoFeed, run_capture_pump, run_video_receiver};

/// Default port of the robot's command/telemetry channel.
pub const DEFAULT_COMMAND_PORT: u16 = 5002;

/// Default port of the robot's video stream.
pub const DEFAULT_VIDEO_PORT: u16 = 8002;

/// Bound on closing the control socket during `disconnect`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where and how to reach the robot.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub command_port: u16,
    pub video_port: u16,
    pub connect_timeout: Duration,
    /// Longest a single frame write may stall before the session is dropped.
    pub send_timeout: Duration,
    /// Interval at which the capture gate is re-armed.
    pub video_poll_interval: Duration,
}

impl LinkConfig {
    pub fn command_addr(&self) -> String {
        format!("{}:{}", self.host, self.command_port)
    }

    pub fn video_addr(&self) -> String {
        format!("{}:{}", self.host, self.video_port)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            command_port: DEFAULT_COMMAND_PORT,
            video_port: DEFAULT_VIDEO_PORT,
            connect_timeout: Duration::from_secs(3),
            send_timeout: Duration::from_secs(2),
            video_poll_interval: Duration::from_millis(100),
        }
    }
}

struct Session {
    id: u64,
    remote: SocketAddr,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Connection manager for the robot's control channel.
pub struct RobotLink {
    config: LinkConfig,
    state: StateStore,
    video: Arc<VideoFeed>,
    lifecycle: tokio::sync::Mutex<()>,
    slot: Mutex<Option<Session>>,
    next_session_id: AtomicU64,
}

impl RobotLink {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            state: StateStore::new(),
            video: Arc::new(VideoFeed::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            slot: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn video(&self) -> &VideoFeed {
        &self.video
    }

    pub fn is_connected(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// Remote address of the live session, if any.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.lock_slot().as_ref().map(|session| session.remote)
    }

    /// Open the control session and start its background tasks.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::AlreadyConnected`] – a session is already live.
    /// * [`BridgeError::Connect`] – refused, unreachable, or timed out. The
    ///   link stays disconnected.
    pub async fn connect(self: &Arc<Self>) -> Result<SocketAddr, BridgeError> {
        let _transition = self.lifecycle.lock().await;

        if let Some(remote) = self.remote() {
            return Err(BridgeError::AlreadyConnected {
                remote: remote.to_string(),
            });
        }

        let addr = self.config.command_addr();
        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(addr = %addr, error = %e, "connect to robot failed");
                return Err(BridgeError::Connect {
                    addr,
                    details: e.to_string(),
                });
            }
            Err(_) => {
                warn!(addr = %addr, "connect to robot timed out");
                return Err(BridgeError::Connect {
                    details: format!("timed out after {:?}", self.config.connect_timeout),
                    addr,
                });
            }
        };
        let remote = stream.peer_addr().map_err(|e| BridgeError::Connect {
            addr: addr.clone(),
            details: e.to_string(),
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle on control socket");
        }
        let (read_half, write_half) = stream.into_split();

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        {
            let mut slot = self.lock_slot();
            *slot = Some(Session {
                id,
                remote,
                writer: Arc::new(tokio::sync::Mutex::new(write_half)),
                shutdown: shutdown_tx,
                tasks: Vec::with_capacity(3),
            });
            self.state.set_connected(true);
        }
        info!(remote = %remote, session = id, "connected to robot");

        let tasks = vec![
            tokio::spawn(supervise_receiver(
                Arc::clone(self),
                id,
                read_half,
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_video_receiver(
                Arc::clone(&self.video),
                self.config.video_addr(),
                self.config.connect_timeout,
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_capture_pump(
                Arc::clone(&self.video),
                self.state.clone(),
                self.config.video_poll_interval,
                shutdown_rx,
            )),
        ];

        // The receiver may already have ended the session; its tasks then
        // wind down on their own.
        if let Some(session) = self.lock_slot().as_mut().filter(|s| s.id == id) {
            session.tasks = tasks;
        }
        Ok(remote)
    }

    /// Write one frame to the robot, never interleaved with another writer.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::NotConnected`] – no live session, or the session
    ///   ended while the write was pending.
    /// * [`BridgeError::Send`] – the write failed or stalled past
    ///   [`LinkConfig::send_timeout`]; the session is torn down.
    pub async fn send(&self, frame: &CommandFrame) -> Result<(), BridgeError> {
        let (id, writer, mut ended) = {
            let slot = self.lock_slot();
            let session = slot.as_ref().ok_or(BridgeError::NotConnected)?;
            (
                session.id,
                Arc::clone(&session.writer),
                session.shutdown.subscribe(),
            )
        };

        let bytes = frame.encode();
        let write = async {
            let mut writer = writer.lock().await;
            writer.write_all(bytes.as_bytes()).await
        };
        let outcome = tokio::select! {
            biased;
            () = session_ended(&mut ended) => {
                debug!(frame = %frame, session = id, "session ended before the frame was written");
                return Err(BridgeError::NotConnected);
            }
            outcome = tokio::time::timeout(self.config.send_timeout, write) => outcome,
        };

        let details = match outcome {
            Ok(Ok(())) => {
                debug!(frame = %frame, "sent frame");
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("write stalled for {:?}", self.config.send_timeout),
        };
        warn!(frame = %frame, error = %details, "send failed, dropping session");
        self.release(id);
        Err(BridgeError::Send(details))
    }

    /// Encode and send a typed command.
    pub async fn send_command(&self, command: &Command) -> Result<(), BridgeError> {
        self.send(&command.to_frame()).await
    }

    /// Close the session and wait for its tasks. Returns `false` when there
    /// was no session to close.
    pub async fn disconnect(&self) -> bool {
        let _transition = self.lifecycle.lock().await;

        let Some(session) = self.take_session() else {
            debug!("disconnect requested without a live session");
            return false;
        };

        // Pending sends see the shutdown signal and let go of the writer.
        let close = async { session.writer.lock().await.shutdown().await };
        match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "control socket shutdown reported an error"),
            Err(_) => debug!("control socket close timed out; dropping it instead"),
        }
        for task in session.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }
        info!(remote = %session.remote, session = session.id, "disconnected from robot");
        true
    }

    /// Tear down session `id` if it is still the live one.
    fn release(&self, id: u64) {
        let mut slot = self.lock_slot();
        if slot.as_ref().is_some_and(|s| s.id == id) {
            if let Some(session) = slot.take() {
                self.state.set_connected(false);
                let _ = session.shutdown.send(true);
                info!(remote = %session.remote, session = id, "session released");
            }
        }
    }

    fn take_session(&self) -> Option<Session> {
        let mut slot = self.lock_slot();
        let session = slot.take()?;
        self.state.set_connected(false);
        let _ = session.shutdown.send(true);
        Some(session)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves once the session's shutdown flag is raised or its sender is gone.
async fn session_ended(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stopped = *shutdown.borrow_and_update();
        if stopped || shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn supervise_receiver(
    link: Arc<RobotLink>,
    id: u64,
    read_half: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = FrameReader::new(read_half);
    match run_receive_loop(&mut reader, link.state(), &mut shutdown).await {
        LoopExit::Shutdown => debug!(session = id, "receive loop stopped"),
        LoopExit::Closed => warn!(session = id, "robot closed the control connection"),
        LoopExit::Desync => warn!(session = id, "receive loop stopped on stream desync"),
        LoopExit::Failed(e) => warn!(session = id, error = %e, "receive loop failed"),
    }
    link.release(id);
}
