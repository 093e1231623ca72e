//! Telemetry receive loop.
//!
//! One loop runs per live session. It pulls record-aligned chunks from the
//! [`FrameReader`], splits them into records, and folds the ones it
//! understands into the [`StateStore`]. A garbled record only costs that
//! record; the loop itself stops on close, read failure, desync, or an
//! explicit shutdown signal.

use std::ops::ControlFlow;

use quadbridge_types::BridgeError;
use quadbridge_types::telemetry::{parse_record, split_records};
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::framing::FrameReader;
use crate::state::StateStore;

/// Why [`run_receive_loop`] returned.
#[derive(Debug)]
pub enum LoopExit {
    /// The robot closed the connection.
    Closed,
    /// `disconnect` asked the loop to stop.
    Shutdown,
    /// A blank record showed the stream is out of step.
    Desync,
    /// The socket read failed.
    Failed(BridgeError),
}

/// Receive and dispatch until the session ends.
pub async fn run_receive_loop<R>(
    reader: &mut FrameReader<R>,
    state: &StateStore,
    shutdown: &mut watch::Receiver<bool>,
) -> LoopExit
where
    R: AsyncRead + Unpin,
{
    loop {
        if *shutdown.borrow() {
            return LoopExit::Shutdown;
        }
        let raw = tokio::select! {
            biased;
            _ = shutdown.changed() => return LoopExit::Shutdown,
            result = reader.receive_frame() => match result {
                Ok(raw) => raw,
                Err(e) => return LoopExit::Failed(e),
            },
        };
        if raw.is_empty() {
            return LoopExit::Closed;
        }
        if dispatch(&raw, state).is_break() {
            return LoopExit::Desync;
        }
    }
}

/// Apply every record in `raw`, in order.
///
/// Breaks on the first empty record; records after it in the same chunk are
/// not applied.
pub fn dispatch(raw: &[u8], state: &StateStore) -> ControlFlow<()> {
    for record in split_records(raw) {
        match parse_record(record) {
            Ok(Some(parsed)) => {
                trace!(record = ?parsed, "applying telemetry record");
                state.apply(&parsed);
            }
            Ok(None) => debug!(record = %String::from_utf8_lossy(record), "ignoring record with unhandled code"),
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "telemetry stream desynchronised");
                return ControlFlow::Break(());
            }
            Err(e) => warn!(
                record = %String::from_utf8_lossy(record),
                error = %e,
                "dropping malformed telemetry record"
            ),
        }
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn back_to_back_records_are_applied_in_order() {
        let state = StateStore::new();
        let flow = dispatch(b"CMD_SONIC#10\nCMD_SONIC#20\n", &state);
        assert!(flow.is_continue());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.distance_seq, 2);
        assert_eq!(snapshot.distance, "20cm");
    }

    #[test]
    fn malformed_power_record_leaves_state_untouched() {
        let state = StateStore::new();
        state.apply(&quadbridge_types::TelemetryRecord::Power {
            servo: "7.9".to_string(),
            rasp: "5.0".to_string(),
        });

        assert!(dispatch(b"CMD_POWER#8.40\n", &state).is_continue());
        assert!(dispatch(b"CMD_POWER#8.40#5.10#0.1\n", &state).is_continue());

        let snapshot = state.snapshot();
        assert_eq!(snapshot.power_servo, "7.9");
        assert_eq!(snapshot.power_rasp, "5.0");
        assert_eq!(snapshot.power_seq, 1);
    }

    #[test]
    fn unknown_code_changes_nothing() {
        let state = StateStore::new();
        let before = state.snapshot();
        assert!(dispatch(b"CMD_TELEPORT#1#2#3\n", &state).is_continue());
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn malformed_record_does_not_block_the_next_one() {
        let state = StateStore::new();
        assert!(dispatch(b"CMD_SONIC\nCMD_SONIC#44\n", &state).is_continue());
        assert_eq!(state.snapshot().distance, "44cm");
    }

    #[test]
    fn record_with_invalid_utf8_is_skipped() {
        let state = StateStore::new();
        assert!(dispatch(b"CMD_SONIC#3\xFF7\nCMD_POWER#8.1#5.0\n", &state).is_continue());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.distance, "0cm");
        assert_eq!(snapshot.distance_seq, 0);
        assert_eq!(snapshot.power_servo, "8.1");
    }

    #[test]
    fn blank_record_breaks_dispatch() {
        let state = StateStore::new();
        assert!(dispatch(b"CMD_SONIC#1\n\nCMD_SONIC#2\n", &state).is_break());
        assert_eq!(state.snapshot().distance, "1cm");
    }

    #[tokio::test]
    async fn loop_keeps_running_past_unknown_codes_and_ends_on_close() {
        let (mut robot, bridge) = tokio::io::duplex(1024);
        let state = StateStore::new();
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        robot.write_all(b"CMD_NOPE#1\n").await.unwrap();
        robot.write_all(b"CMD_SONIC#37\n").await.unwrap();
        robot.write_all(b"CMD_POWER#8.40#5.10\n").await.unwrap();
        drop(robot);

        let mut reader = FrameReader::new(bridge);
        let exit = run_receive_loop(&mut reader, &state, &mut shutdown_rx).await;
        assert!(matches!(exit, LoopExit::Closed));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.distance, "37cm");
        assert_eq!(snapshot.power_servo, "8.40");
        assert_eq!(snapshot.power_rasp, "5.10");
    }

    #[tokio::test]
    async fn shutdown_unblocks_a_pending_read() {
        let (_robot, bridge) = tokio::io::duplex(64);
        let state = StateStore::new();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(bridge);
            run_receive_loop(&mut reader, &state, &mut shutdown_rx).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop must stop")
            .unwrap();
        assert!(matches!(exit, LoopExit::Shutdown));
    }

    #[tokio::test]
    async fn desync_stops_the_loop() {
        let state = StateStore::new();
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut reader = FrameReader::new(&b"CMD_SONIC#5\n\n"[..]);
        let exit = run_receive_loop(&mut reader, &state, &mut shutdown_rx).await;
        assert!(matches!(exit, LoopExit::Desync));
    }
}
