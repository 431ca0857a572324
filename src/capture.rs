//! Measurement capture engine: drives one hole-capture attempt.
//!
//! Per attempt the engine walks `Idle -> Sampling -> Settled -> Recorded`,
//! or `Idle -> Sampling -> Aborted` on disconnect or operator cancel. While
//! sampling it polls the controller gateway at a fixed cadence (one reading
//! per second, the controller's native reporting grain) and terminates only
//! on the controller's own end-of-drive reading; there is no client-side
//! stability heuristic and no local timeout. A stalled controller surfaces
//! as `is_connected() == false`, not as a timer.
//!
//! Polling is the session's only suspension point: it blocks advancement of
//! (sample, hole) but the state watch channel lets a UI render status
//! without touching the gateway.

use crate::controller::{ControllerGateway, TorqueReading};
use crate::error::{AppResult, WizardError};
use crate::session::{HoleId, SampleIndex};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Observable state of the capture attempt in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Sampling,
    Settled,
    Recorded,
    Aborted,
}

/// Why a capture attempt ended without a measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The gateway reported disconnection mid-sampling.
    Disconnected,
    /// The operator cancelled the active capture.
    Cancelled,
}

/// Result of one capture attempt. Only `Recorded` produces a measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CaptureOutcome {
    Recorded {
        torque_ncm: f64,
        timestamp: DateTime<Utc>,
    },
    Aborted(AbortReason),
}

pub struct CaptureEngine {
    poll_interval: Duration,
    state_tx: watch::Sender<CaptureState>,
}

impl CaptureEngine {
    pub fn new(poll_interval: Duration) -> Self {
        let (state_tx, _) = watch::channel(CaptureState::Idle);
        Self {
            poll_interval,
            state_tx,
        }
    }

    /// Subscribes to capture-state updates (for status display).
    pub fn state(&self) -> watch::Receiver<CaptureState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: CaptureState) {
        // Send only fails with no receivers, which is fine for status
        let _ = self.state_tx.send(state);
    }

    /// Runs one capture attempt for (sample, hole).
    ///
    /// Returns `Recorded` with the controller's final torque and the capture
    /// timestamp, or `Aborted` with the reason. An aborted attempt must be
    /// retried at the same (sample, hole) position, never skipped.
    pub async fn capture(
        &self,
        gateway: &mut dyn ControllerGateway,
        sample: SampleIndex,
        hole: HoleId,
        cancel: &CancellationToken,
    ) -> AppResult<CaptureOutcome> {
        log::info!("Sampling hole '{hole}' of sample {sample}");
        self.set_state(CaptureState::Sampling);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if cancel.is_cancelled() {
                log::warn!("Capture for ({sample}, {hole}) cancelled by operator");
                self.set_state(CaptureState::Aborted);
                return Ok(CaptureOutcome::Aborted(AbortReason::Cancelled));
            }
            if !gateway.is_connected().await {
                log::warn!("Controller disconnected while sampling ({sample}, {hole})");
                self.set_state(CaptureState::Aborted);
                return Ok(CaptureOutcome::Aborted(AbortReason::Disconnected));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::warn!("Capture for ({sample}, {hole}) cancelled by operator");
                    self.set_state(CaptureState::Aborted);
                    return Ok(CaptureOutcome::Aborted(AbortReason::Cancelled));
                }
                _ = ticker.tick() => {
                    let reading = gateway
                        .read_current_torque()
                        .await
                        .map_err(|e| WizardError::Controller(e.to_string()))?;
                    match reading {
                        TorqueReading::NotAvailable => {
                            log::debug!("({sample}, {hole}): no reading yet");
                        }
                        TorqueReading::InProgress(ncm) => {
                            log::debug!("({sample}, {hole}): in progress, {ncm:.1} N·cm");
                        }
                        TorqueReading::Final(torque_ncm) => {
                            self.set_state(CaptureState::Settled);
                            let timestamp = Utc::now();
                            log::info!(
                                "({sample}, {hole}): settled at {torque_ncm:.1} N·cm"
                            );
                            self.set_state(CaptureState::Recorded);
                            return Ok(CaptureOutcome::Recorded { torque_ncm, timestamp });
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockController;

    fn engine() -> CaptureEngine {
        CaptureEngine::new(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_records_final_reading() {
        let mut ctl = MockController::with_jitter(24.0, 0.0, 0);
        ctl.set_torque_target(24.0).await.unwrap();
        let engine = engine();
        let outcome = engine
            .capture(
                &mut ctl,
                SampleIndex(1),
                HoleId::from_ordinal(0),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        match outcome {
            CaptureOutcome::Recorded { torque_ncm, .. } => assert_eq!(torque_ncm, 24.0),
            other => panic!("expected Recorded, got {other:?}"),
        }
        assert_eq!(*engine.state().borrow(), CaptureState::Recorded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_without_measurement() {
        let mut ctl = MockController::with_jitter(24.0, 0.0, 0);
        ctl.connection_handle().set_connected(false);
        let engine = engine();
        let outcome = engine
            .capture(
                &mut ctl,
                SampleIndex(1),
                HoleId::from_ordinal(0),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Aborted(AbortReason::Disconnected));
        assert_eq!(*engine.state().borrow(), CaptureState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_cancel_aborts() {
        let mut ctl = MockController::with_jitter(24.0, 0.0, 0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = engine()
            .capture(&mut ctl, SampleIndex(1), HoleId::from_ordinal(0), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Aborted(AbortReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_reconnect_succeeds() {
        let mut ctl = MockController::with_jitter(24.0, 0.0, 0);
        ctl.set_torque_target(24.0).await.unwrap();
        let handle = ctl.connection_handle();
        handle.set_connected(false);
        let engine = engine();
        let cancel = CancellationToken::new();
        let sample = SampleIndex(1);
        let hole = HoleId::from_ordinal(0);

        let first = engine
            .capture(&mut ctl, sample, hole, &cancel)
            .await
            .unwrap();
        assert_eq!(first, CaptureOutcome::Aborted(AbortReason::Disconnected));

        handle.set_connected(true);
        let second = engine
            .capture(&mut ctl, sample, hole, &cancel)
            .await
            .unwrap();
        assert!(matches!(second, CaptureOutcome::Recorded { .. }));
    }
}
