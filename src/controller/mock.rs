//! A simulated torque controller for running sessions without hardware.
//!
//! Each drive cycle reports a short ramp of in-progress readings followed by
//! a final result near the target (target ± jitter), mimicking the real
//! controller's per-second readout. Connectivity is shared through a handle
//! so tests and the operator UI can drop and restore the link mid-capture.

use super::{ControllerGateway, TorqueReading};
use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared connectivity switch for a [`MockController`].
#[derive(Clone, Debug)]
pub struct ConnectionHandle(Arc<AtomicBool>);

impl ConnectionHandle {
    pub fn set_connected(&self, connected: bool) {
        self.0.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct MockController {
    connected: Arc<AtomicBool>,
    target_ncm: f64,
    jitter_ncm: f64,
    ramp_len: u32,
    step: u32,
    rng: StdRng,
}

impl MockController {
    /// Controller with realistic jitter (±1.5 N·cm on the final reading).
    pub fn new(default_target_ncm: f64) -> Self {
        Self::with_jitter(default_target_ncm, 1.5, rand::random())
    }

    /// Fully deterministic controller for tests: fixed seed, custom jitter.
    pub fn with_jitter(default_target_ncm: f64, jitter_ncm: f64, seed: u64) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
            target_ncm: default_target_ncm,
            jitter_ncm,
            ramp_len: 2,
            step: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Handle for toggling connectivity from outside the gateway.
    pub fn connection_handle(&self) -> ConnectionHandle {
        ConnectionHandle(Arc::clone(&self.connected))
    }

    /// Number of in-progress readings reported before the final result.
    pub fn set_ramp_len(&mut self, ramp_len: u32) {
        self.ramp_len = ramp_len;
    }
}

#[async_trait]
impl ControllerGateway for MockController {
    fn name(&self) -> String {
        "Simulated MT6000".to_string()
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn set_torque_target(&mut self, ncm: f64) -> Result<()> {
        anyhow::ensure!(ncm > 0.0, "torque target must be positive, got {ncm}");
        log::debug!("Mock controller target set to {ncm:.1} N·cm");
        self.target_ncm = ncm;
        self.step = 0;
        Ok(())
    }

    async fn read_current_torque(&mut self) -> Result<TorqueReading> {
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(TorqueReading::NotAvailable);
        }
        self.step += 1;
        if self.step <= self.ramp_len {
            // Ramp toward the target while the (simulated) screw runs down
            let fraction = self.step as f64 / (self.ramp_len + 1) as f64;
            Ok(TorqueReading::InProgress(self.target_ncm * fraction))
        } else {
            self.step = 0;
            let jitter = if self.jitter_ncm > 0.0 {
                self.rng.gen_range(-self.jitter_ncm..=self.jitter_ncm)
            } else {
                0.0
            };
            Ok(TorqueReading::Final(self.target_ncm + jitter))
        }
    }
}
