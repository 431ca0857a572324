//! Torque-controller gateway: the interface contract the core consumes.
//!
//! The controller itself (wire protocol, drive electronics) is an external
//! collaborator. The core only depends on three capabilities: a connectivity
//! flag, a torque-target setter, and a current-torque read whose terminal
//! value is the controller's own end-of-drive result. Anything that exposes
//! these through [`ControllerGateway`] can drive a session; this crate ships
//! the simulated implementation in [`mock`].

pub mod mock;

pub use mock::MockController;

use crate::config::ControllerSettings;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// One torque readout from the controller, at its native 1 Hz grain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TorqueReading {
    /// No drive cycle active, or the controller has nothing to report yet.
    /// Transient; polling continues.
    NotAvailable,
    /// Torque currently applied mid-cycle, in N·cm.
    InProgress(f64),
    /// The controller's end-of-drive result, in N·cm. Terminal for the
    /// current capture attempt.
    Final(f64),
}

/// Capabilities the core requires from a torque controller.
///
/// Only one capture attempt is ever in flight, so implementations may assume
/// calls are never overlapped.
#[async_trait]
pub trait ControllerGateway: Send + Sync {
    /// Human-readable gateway name for logs.
    fn name(&self) -> String;

    /// Current connectivity. `false` is a hard stop: no capture proceeds
    /// until the operator restores the connection.
    async fn is_connected(&self) -> bool;

    /// Pushes the target torque (N·cm) for subsequent drive cycles.
    async fn set_torque_target(&mut self, ncm: f64) -> Result<()>;

    /// Reads the controller's current torque report.
    async fn read_current_torque(&mut self) -> Result<TorqueReading>;
}

/// Boolean connectivity probe invoked at process start.
///
/// Opens and immediately drops a TCP connection to the configured controller
/// address; no protocol traffic is exchanged. Simulation mode always probes
/// true.
pub async fn probe_connectivity(settings: &ControllerSettings) -> bool {
    if settings.simulate {
        return true;
    }
    let addr = format!("{}:{}", settings.address, settings.port);
    let timeout = Duration::from_secs(settings.connection_timeout_secs.max(1));
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => {
            log::info!("Controller reachable at {addr}");
            true
        }
        Ok(Err(e)) => {
            log::warn!("Controller not reachable at {addr}: {e}");
            false
        }
        Err(_) => {
            log::warn!("Controller probe timed out after {timeout:?} ({addr})");
            false
        }
    }
}
