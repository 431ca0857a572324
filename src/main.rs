//! Terminal wizard for the screw-torque test workflow.
//!
//! Walks the operator through the same steps as the original controller
//! software: connect, define holes and samples, supply images, place hole
//! markers, then run the per-sample, per-hole capture loop with results and
//! charts written under the results directory.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use torque_wizard::capture::AbortReason;
use torque_wizard::config::Settings;
use torque_wizard::controller::{probe_connectivity, ControllerGateway, MockController};
use torque_wizard::session::{HoleId, ImageAssignment, SampleIndex, Session, SessionPlan};
use torque_wizard::wizard::{Operator, RunnerOptions, SessionRunner};

#[derive(Parser, Debug)]
#[command(name = "torque-wizard", about = "Operator-guided screw-torque test sessions")]
struct Cli {
    /// Path to the settings file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against the simulated controller, no hardware required
    #[arg(long)]
    simulate: bool,

    /// Use a named preset from the settings file instead of manual setup
    #[arg(long)]
    preset: Option<String>,

    /// Number of samples when using a preset
    #[arg(long, default_value_t = 1)]
    samples: u32,
}

/// Line-oriented stdin prompter shared by the setup steps and the operator.
struct TerminalPrompt {
    lines: Lines<BufReader<Stdin>>,
}

impl TerminalPrompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn ask(&mut self, prompt: &str) -> Result<String> {
        println!("{prompt}");
        let line = self
            .lines
            .next_line()
            .await?
            .context("stdin closed while waiting for input")?;
        Ok(line.trim().to_string())
    }

    async fn ask_number<T: std::str::FromStr>(&mut self, prompt: &str) -> Result<T> {
        loop {
            let answer = self.ask(prompt).await?;
            match answer.parse() {
                Ok(v) => return Ok(v),
                Err(_) => println!("Not a valid number, try again."),
            }
        }
    }
}

/// Operator prompts on the terminal.
struct TerminalOperator {
    prompt: TerminalPrompt,
}

#[async_trait::async_trait]
impl Operator for TerminalOperator {
    async fn confirm_torque_target(
        &mut self,
        sample: SampleIndex,
        current_ncm: f64,
    ) -> Result<f64> {
        let answer = self
            .prompt
            .ask(&format!(
                "Sample {sample}: torque target in Ncm [{current_ncm}]: "
            ))
            .await?;
        if answer.is_empty() {
            return Ok(current_ncm);
        }
        answer
            .parse()
            .with_context(|| format!("invalid torque value '{answer}'"))
    }

    async fn present_hole(
        &mut self,
        sample: SampleIndex,
        hole: HoleId,
        image: usize,
        artifact: &Path,
    ) -> Result<()> {
        self.prompt
            .ask(&format!(
                "Sample {sample}: place the screwdriver at hole '{hole}' \
                 (image {image}: {}) and press Enter to record.",
                artifact.display()
            ))
            .await?;
        Ok(())
    }

    async fn capture_aborted(
        &mut self,
        sample: SampleIndex,
        hole: HoleId,
        reason: AbortReason,
    ) -> Result<()> {
        let why = match reason {
            AbortReason::Disconnected => "the controller disconnected",
            AbortReason::Cancelled => "the capture was cancelled",
        };
        self.prompt
            .ask(&format!(
                "No measurement for sample {sample}, hole '{hole}': {why}. \
                 Restore the connection and press Enter to retry."
            ))
            .await?;
        Ok(())
    }

    async fn sample_complete(&mut self, sample: SampleIndex, report: &Path) -> Result<()> {
        self.prompt
            .ask(&format!(
                "Sample {sample} complete. Chart written to '{}'. Press Enter to continue.",
                report.display()
            ))
            .await?;
        Ok(())
    }
}

/// Interactive hole/sample/image definition, mirroring the original wizard.
async fn build_manual_plan(
    prompt: &mut TerminalPrompt,
    settings: &Settings,
) -> Result<SessionPlan> {
    let hole_count: usize = prompt
        .ask_number("Number of screw holes (A, B, ...): ")
        .await?;
    let sample_count: u32 = prompt.ask_number("Number of samples: ").await?;
    let image_count: usize = prompt.ask_number("How many images? ").await?;

    let mut assignments = Vec::with_capacity(image_count.max(1));
    let mut remaining = hole_count;
    for i in 1..=image_count {
        let source = loop {
            let path = PathBuf::from(prompt.ask(&format!("Path to image {i}: ")).await?);
            if path.is_file() {
                break path;
            }
            println!("File not found: {}", path.display());
        };
        // Keep a copy under the asset directory, referenced by index
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_string();
        let dest = settings.storage.asset_dir.join(format!("img_{i}.{ext}"));
        std::fs::copy(&source, &dest)
            .with_context(|| format!("copying '{}' into the asset directory", source.display()))?;

        if image_count == 1 {
            assignments.push(ImageAssignment::whole(dest));
        } else {
            let count: usize = prompt
                .ask_number(&format!(
                    "How many screw holes in image {i}? (remaining: {remaining}) "
                ))
                .await?;
            remaining = remaining.saturating_sub(count);
            assignments.push(ImageAssignment::new(dest, count));
        }
    }

    Ok(SessionPlan::new(hole_count, sample_count, assignments)?)
}

/// Marker placement: one (x, y) per hole, then coverage validation.
async fn annotate(prompt: &mut TerminalPrompt, session: &mut Session) -> Result<()> {
    loop {
        let images = session.plan().images().to_vec();
        for spec in &images {
            for hole in &spec.holes {
                if session.annotations().position_of(*hole).is_some() {
                    continue;
                }
                let (x, y) = loop {
                    let answer = prompt
                        .ask(&format!(
                            "Marker position for hole '{hole}' on image {} as 'x y': ",
                            spec.index
                        ))
                        .await?;
                    let parts: Vec<&str> = answer.split_whitespace().collect();
                    if let [x, y] = parts[..] {
                        if let (Ok(x), Ok(y)) = (x.parse::<u32>(), y.parse::<u32>()) {
                            break (x, y);
                        }
                    }
                    println!("Expected two pixel coordinates, e.g. '120 80'.");
                };
                session.place_annotation(*hole, spec.index, (x, y))?;
            }
        }
        match session.validate_coverage() {
            Ok(()) => return Ok(()),
            Err(e) => println!("{e}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut settings = Settings::new(cli.config.as_deref())?;
    if cli.simulate {
        settings.controller.simulate = true;
    }
    settings.ensure_dirs()?;

    // Connectivity check at process start; no test flow without it.
    if !probe_connectivity(&settings.controller).await {
        bail!(
            "Could not reach the torque controller at {}:{}. \
             Check power, address and network, or run with --simulate.",
            settings.controller.address,
            settings.controller.port
        );
    }
    if !settings.controller.simulate {
        // The controller protocol is an external collaborator; this build
        // bundles only the simulated gateway.
        bail!(
            "No hardware gateway is linked in this build; \
             run with --simulate or wire a ControllerGateway implementation."
        );
    }

    let mut prompt = TerminalPrompt::new();
    let default_torque = settings.test.default_target_torque_ncm;

    let session = if let Some(name) = &cli.preset {
        let preset = settings
            .preset(name)
            .with_context(|| format!("preset '{name}' not found in the settings file"))?;
        let plan = SessionPlan::from_preset(preset, cli.samples, &settings.storage.asset_dir)?;
        Session::new(plan, default_torque)
    } else {
        let plan = build_manual_plan(&mut prompt, &settings).await?;
        let mut session = Session::new(plan, default_torque);
        annotate(&mut prompt, &mut session).await?;
        session
    };

    let mut gateway = MockController::new(default_torque);
    log::info!("Using gateway: {}", gateway.name());

    let mut runner = SessionRunner::new(session, RunnerOptions::from_settings(&settings));
    let mut operator = TerminalOperator { prompt };
    let summary = runner.run(&mut gateway, &mut operator).await?;

    println!(
        "Session complete: {} measurements.\nResults: {}\nChart:   {}",
        summary.measurements,
        summary.results_csv.display(),
        summary.report.display()
    );
    Ok(())
}
