//! Test session state machine: sequences holes within a sample and samples
//! within a session.
//!
//! The runner owns the [`Session`] aggregate and drives the capture engine
//! hole by hole, persisting every measurement before advancing. Operator
//! interaction goes through the [`Operator`] trait so the terminal wizard,
//! a GUI, or a scripted test can all drive the same flow.
//!
//! ```text
//! Setup -> Configuring(1) -> Running(1, A) ... -> SampleComplete(1)
//!       -> Configuring(2) -> ...             -> SessionComplete
//! ```
//!
//! An aborted capture (disconnect or operator cancel) keeps the state at
//! `Running(i, j)`; the same position is retried after the operator
//! intervenes, never skipped and never recorded twice.

use crate::capture::{AbortReason, CaptureEngine, CaptureOutcome};
use crate::config::Settings;
use crate::controller::ControllerGateway;
use crate::error::{AppResult, WizardError};
use crate::report::ReportGenerator;
use crate::results::Measurement;
use crate::session::{HoleId, SampleIndex, Session};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Observable position of the session state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Setup,
    Configuring { sample: SampleIndex },
    Running { sample: SampleIndex, hole: HoleId },
    SampleComplete { sample: SampleIndex },
    SessionComplete,
}

/// Operator-facing prompts. Implementations must not skip a prompt: the
/// runner only proceeds on `Ok`.
#[async_trait]
pub trait Operator: Send {
    /// Confirm or change the torque target (N·cm) for the upcoming sample.
    /// `current_ncm` is the default (24.0 on the first sample, carried over
    /// thereafter).
    async fn confirm_torque_target(&mut self, sample: SampleIndex, current_ncm: f64)
        -> Result<f64>;

    /// Present the hole to drive next, with the annotated image to show.
    async fn present_hole(
        &mut self,
        sample: SampleIndex,
        hole: HoleId,
        image: usize,
        artifact: &Path,
    ) -> Result<()>;

    /// A capture attempt ended without a measurement. The runner retries the
    /// same (sample, hole) once this returns; implementations restore
    /// connectivity or tell the user to.
    async fn capture_aborted(
        &mut self,
        sample: SampleIndex,
        hole: HoleId,
        reason: AbortReason,
    ) -> Result<()>;

    /// A sample finished; the cumulative report artifact is at `report`.
    async fn sample_complete(&mut self, sample: SampleIndex, report: &Path) -> Result<()>;
}

/// Everything the runner produces for the operator at session end.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub measurements: usize,
    pub results_csv: PathBuf,
    pub report: PathBuf,
}

/// Runner knobs derived from [`Settings`].
#[derive(Clone, Debug)]
pub struct RunnerOptions {
    pub asset_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Controller address or "SIM", used in artifact file names.
    pub connection_id: String,
    pub poll_interval: Duration,
}

impl RunnerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            asset_dir: settings.storage.asset_dir.clone(),
            results_dir: settings.storage.results_dir.clone(),
            connection_id: settings.controller.connection_id(),
            poll_interval: Duration::from_millis(settings.test.poll_interval_ms),
        }
    }
}

pub struct SessionRunner {
    session: Session,
    engine: CaptureEngine,
    report: ReportGenerator,
    options: RunnerOptions,
    state_tx: watch::Sender<SessionState>,
    /// Token for the capture attempt currently in flight; replaced per
    /// attempt and published so the UI can cancel the active capture.
    abort_tx: watch::Sender<CancellationToken>,
    /// Annotated-image artifact per image index, frozen at test start.
    artifacts: HashMap<usize, PathBuf>,
}

impl SessionRunner {
    pub fn new(session: Session, options: RunnerOptions) -> Self {
        let engine = CaptureEngine::new(options.poll_interval);
        let (state_tx, _) = watch::channel(SessionState::Setup);
        let (abort_tx, _) = watch::channel(CancellationToken::new());
        Self {
            session,
            engine,
            report: ReportGenerator::new(),
            options,
            state_tx,
            abort_tx,
            artifacts: HashMap::new(),
        }
    }

    /// Subscribes to state-machine transitions (for status display).
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Subscribes to the active capture's cancellation token. Cancelling the
    /// borrowed token aborts only the capture in flight.
    pub fn abort_handle(&self) -> watch::Receiver<CancellationToken> {
        self.abort_tx.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Gives the session back, e.g. for archival after completion.
    pub fn into_session(self) -> Session {
        self.session
    }

    fn set_state(&self, state: SessionState) {
        log::debug!("Session state: {state:?}");
        let _ = self.state_tx.send(state);
    }

    fn results_csv_path(&self) -> PathBuf {
        self.options.results_dir.join(format!(
            "torque_results_{}_{}.csv",
            self.options.connection_id,
            format_torque(self.session.torque_target_ncm())
        ))
    }

    fn report_path(&self) -> PathBuf {
        self.options.results_dir.join(format!(
            "torque_plot_{}_{}.png",
            self.options.connection_id,
            format_torque(self.session.torque_target_ncm())
        ))
    }

    /// Renders (or, for presets, passes through) the annotated-image
    /// artifact for every image. These are frozen for the rest of the run.
    fn freeze_artifacts(&mut self) -> AppResult<()> {
        for spec in self.session.plan().images().to_vec() {
            let path = if self.session.plan().is_preset() {
                // Preset images are already labeled
                spec.source.clone()
            } else {
                self.session.annotations().write_annotated_image(
                    self.session.plan(),
                    spec.index,
                    &self.options.asset_dir,
                )?
            };
            self.artifacts.insert(spec.index, path);
        }
        Ok(())
    }

    /// Drives the whole session to `SessionComplete`.
    ///
    /// Fails with `IncompleteCoverage` straight away if any hole lacks an
    /// annotation; the caller may re-annotate and call again.
    pub async fn run(
        &mut self,
        gateway: &mut dyn ControllerGateway,
        operator: &mut dyn Operator,
    ) -> AppResult<SessionSummary> {
        self.set_state(SessionState::Setup);
        if !self.session.plan().is_preset() {
            self.session.validate_coverage()?;
        }
        self.freeze_artifacts()?;

        let order = self.session.plan().capture_order();
        let sample_count = self.session.plan().sample_count();
        log::info!(
            "Starting session: {} holes x {} samples via {}",
            order.len(),
            sample_count,
            gateway.name()
        );

        let mut report_path = self.report_path();
        for s in 1..=sample_count {
            let sample = SampleIndex(s);
            self.configure_sample(gateway, operator, sample).await?;

            for hole in &order {
                self.capture_hole(gateway, operator, sample, *hole).await?;
            }

            self.set_state(SessionState::SampleComplete { sample });
            let rows = self.session.results().rows_for_samples_up_to(sample);
            self.session.results().export_csv(&self.results_csv_path())?;
            report_path = self.report.generate(&rows, &self.report_path())?;
            operator
                .sample_complete(sample, &report_path)
                .await
                .map_err(|e| WizardError::Operator(e.to_string()))?;
        }

        self.set_state(SessionState::SessionComplete);
        let results_csv = self.results_csv_path();
        log::info!(
            "Session complete: {} measurements, results at '{}'",
            self.session.results().len(),
            results_csv.display()
        );
        Ok(SessionSummary {
            measurements: self.session.results().len(),
            results_csv,
            report: report_path,
        })
    }

    async fn configure_sample(
        &mut self,
        gateway: &mut dyn ControllerGateway,
        operator: &mut dyn Operator,
        sample: SampleIndex,
    ) -> AppResult<()> {
        self.set_state(SessionState::Configuring { sample });
        let current = self.session.torque_target_ncm();
        let target = operator
            .confirm_torque_target(sample, current)
            .await
            .map_err(|e| WizardError::Operator(e.to_string()))?;
        self.session.set_torque_target_ncm(target)?;
        gateway
            .set_torque_target(target)
            .await
            .map_err(|e| WizardError::Controller(e.to_string()))?;
        log::info!("Sample {sample}: torque target {target:.1} N·cm");
        Ok(())
    }

    /// Captures one hole, retrying the same position until a measurement is
    /// recorded. Aborts never advance the hole and never record.
    async fn capture_hole(
        &mut self,
        gateway: &mut dyn ControllerGateway,
        operator: &mut dyn Operator,
        sample: SampleIndex,
        hole: HoleId,
    ) -> AppResult<()> {
        let image = self.session.plan().image_of(hole)?.index;
        let artifact = self
            .artifacts
            .get(&image)
            .cloned()
            .ok_or(WizardError::UnknownImage(image))?;

        loop {
            self.set_state(SessionState::Running { sample, hole });
            operator
                .present_hole(sample, hole, image, &artifact)
                .await
                .map_err(|e| WizardError::Operator(e.to_string()))?;

            let token = CancellationToken::new();
            let _ = self.abort_tx.send(token.clone());

            match self.engine.capture(gateway, sample, hole, &token).await? {
                CaptureOutcome::Recorded {
                    torque_ncm,
                    timestamp,
                } => {
                    let target_ncm = self.session.torque_target_ncm();
                    self.session.results_mut().append(Measurement {
                        sample,
                        hole,
                        target_ncm,
                        torque_ncm,
                        timestamp,
                    })?;
                    return Ok(());
                }
                CaptureOutcome::Aborted(reason) => {
                    operator
                        .capture_aborted(sample, hole, reason)
                        .await
                        .map_err(|e| WizardError::Operator(e.to_string()))?;
                    // Loop retries the same (sample, hole)
                }
            }
        }
    }
}

/// Formats a torque value for artifact file names (24 rather than 24.0,
/// matching the controller software's export naming).
fn format_torque(ncm: f64) -> String {
    if ncm.fract() == 0.0 {
        format!("{}", ncm as i64)
    } else {
        format!("{ncm}")
    }
}
