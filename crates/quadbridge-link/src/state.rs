//! [`StateStore`] – the shared robot state.
//!
//! Built on a [`tokio::sync::watch`] channel holding whole [`RobotState`]
//! snapshots. Every write replaces the snapshot atomically, so a reader can
//! never observe one power rail from a new record and the other from an old
//! one. Handlers that need a fresh telemetry reading remember the relevant
//! sequence number, trigger the robot, and wait for the number to move.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quadbridge_types::{RobotState, Speed, TelemetryRecord};
use tokio::sync::watch;

/// Cheaply cloneable handle; all clones share one snapshot channel.
#[derive(Clone, Debug)]
pub struct StateStore {
    sender: Arc<watch::Sender<RobotState>>,
}

impl StateStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(RobotState::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> RobotState {
        self.sender.borrow().clone()
    }

    /// Receiver that is woken on every published change.
    pub fn subscribe(&self) -> watch::Receiver<RobotState> {
        self.sender.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.borrow().connected
    }

    pub fn set_connected(&self, connected: bool) {
        self.sender.send_if_modified(|state| {
            let changed = state.connected != connected;
            state.connected = connected;
            changed
        });
    }

    pub fn set_speed(&self, speed: Speed) {
        self.sender.send_modify(|state| state.move_speed = speed);
    }

    pub fn speed(&self) -> Speed {
        self.sender.borrow().move_speed
    }

    /// Fold one telemetry record into the snapshot.
    pub fn apply(&self, record: &TelemetryRecord) {
        self.sender.send_modify(|state| {
            match record {
                TelemetryRecord::Distance { centimetres } => {
                    state.distance = format!("{centimetres}cm");
                    state.distance_seq += 1;
                }
                TelemetryRecord::Power { servo, rasp } => {
                    state.power_servo = servo.clone();
                    state.power_rasp = rasp.clone();
                    state.power_seq += 1;
                }
            }
            state.last_telemetry = Some(Utc::now());
        });
    }

    /// Wait until `ready` holds for the published snapshot, at most `within`.
    ///
    /// Returns `false` on timeout; the caller then falls back to whatever the
    /// snapshot holds, which may be one reading behind.
    pub async fn wait_until<F>(&self, within: Duration, ready: F) -> bool
    where
        F: FnMut(&RobotState) -> bool,
    {
        let mut receiver = self.sender.subscribe();
        matches!(
            tokio::time::timeout(within, receiver.wait_for(ready)).await,
            Ok(Ok(_))
        )
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
