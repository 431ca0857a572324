//! Application settings loaded through the `config` crate.
//!
//! Settings are layered: built-in defaults, then the TOML config file, then
//! environment variables prefixed with `TORQUE_WIZARD_` (e.g.
//! `TORQUE_WIZARD_CONTROLLER__SIMULATE=true`). A missing config file is
//! created with the defaults on first run so the operator has something to
//! edit.

use crate::error::{AppResult, WizardError};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default torque target in centinewton-meters, confirmed by the operator at
/// the start of every sample.
pub const DEFAULT_TARGET_TORQUE_NCM: f64 = 24.0;

/// Controller reports one torque reading per second; poll at the same grain.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

const DEFAULT_CONFIG_FILE: &str = "config/settings.toml";

const DEFAULT_CONFIG_TOML: &str = r#"# torque-wizard settings

[controller]
address = "192.168.1.100"
port = 4545
connection_timeout_secs = 5
# Run against the simulated controller, no hardware required.
simulate = false

[storage]
# Uploaded and annotated images.
asset_dir = "lib"
# CSV exports and chart artifacts.
results_dir = "results"

[test]
default_target_torque_ncm = 24.0
poll_interval_ms = 1000

# Named hole layouts with pre-labeled images under <asset_dir>/preset.
[[presets]]
name = "scube lid GigE"

[[presets.images]]
file = "preset/ace_GigE_Lid_A_B_C_D_G.png"
holes = ["A", "B", "C", "D", "G"]

[[presets.images]]
file = "preset/ace_GigE_Lid_E_F.png"
holes = ["E", "F"]
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub controller: ControllerSettings,
    pub storage: StorageSettings,
    pub test: TestSettings,
    #[serde(default)]
    pub presets: Vec<Preset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerSettings {
    pub address: String,
    pub port: u16,
    pub connection_timeout_secs: u64,
    pub simulate: bool,
}

impl ControllerSettings {
    /// Identifier used in artifact file names, matching the controller
    /// address the results came from (or "SIM" in simulation mode).
    pub fn connection_id(&self) -> String {
        if self.simulate {
            "SIM".to_string()
        } else {
            self.address.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub asset_dir: PathBuf,
    pub results_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestSettings {
    pub default_target_torque_ncm: f64,
    pub poll_interval_ms: u64,
}

/// A named hole layout whose images are already labeled; selecting a preset
/// skips image upload and annotation.
#[derive(Debug, Clone, Deserialize)]
pub struct Preset {
    pub name: String,
    pub images: Vec<PresetImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresetImage {
    /// Path relative to the asset directory.
    pub file: String,
    /// Hole letters on this image.
    pub holes: Vec<String>,
}

impl Settings {
    /// Loads settings from the given config file (default
    /// `config/settings.toml`), creating it with defaults if absent.
    pub fn new(config_path: Option<&Path>) -> AppResult<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, DEFAULT_CONFIG_TOML)?;
            log::info!("Wrote default configuration to '{}'", path.display());
        }

        let settings: Settings = Config::builder()
            .set_default("controller.address", "192.168.1.100")?
            .set_default("controller.port", 4545_i64)?
            .set_default("controller.connection_timeout_secs", 5_i64)?
            .set_default("controller.simulate", false)?
            .set_default("storage.asset_dir", "lib")?
            .set_default("storage.results_dir", "results")?
            .set_default("test.default_target_torque_ncm", DEFAULT_TARGET_TORQUE_NCM)?
            .set_default("test.poll_interval_ms", DEFAULT_POLL_INTERVAL_MS as i64)?
            .add_source(File::from(path.as_path()))
            .add_source(Environment::with_prefix("TORQUE_WIZARD").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what deserialization can express.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.test.default_target_torque_ncm > 0.0) {
            return Err(WizardError::InvalidConfig(format!(
                "default target torque must be positive, got {}",
                self.test.default_target_torque_ncm
            )));
        }
        if self.test.poll_interval_ms == 0 {
            return Err(WizardError::InvalidConfig(
                "poll interval must be at least 1 ms".into(),
            ));
        }
        for preset in &self.presets {
            if preset.images.is_empty() {
                return Err(WizardError::InvalidConfig(format!(
                    "preset '{}' has no images",
                    preset.name
                )));
            }
        }
        Ok(())
    }

    /// Creates the asset and results directories if they do not exist.
    pub fn ensure_dirs(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.storage.asset_dir)?;
        std::fs::create_dir_all(self.storage.asset_dir.join("preset"))?;
        std::fs::create_dir_all(&self.storage.results_dir)?;
        Ok(())
    }

    /// Looks up a preset by name.
    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }
}
