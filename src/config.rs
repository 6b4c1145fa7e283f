//! Engine configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! defaults below.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::CaptureConstraints;
use crate::engine::ir::{IrSource, SyntheticIrSettings};
use crate::engine::params::{ParameterSet, DEFAULT_RAMP_SECS};
use crate::error::{KtvError, Result};

const MIN_FFT_SIZE: usize = 32;
const MAX_FFT_SIZE: usize = 32768;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Processing context sample rate in Hz
    pub sample_rate: u32,
    /// Parameter smoothing time constant in seconds
    pub ramp_time_secs: f64,
    /// Directory holding bundled assets
    pub asset_root: PathBuf,
    pub ir: IrSource,
    pub synthetic_ir: SyntheticIrSettings,
    /// FFT size of both debug taps
    pub analyser_fft_size: usize,
    pub capture: CaptureConstraints,
    /// Mix applied on the first start
    pub initial_parameters: ParameterSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            ramp_time_secs: DEFAULT_RAMP_SECS,
            asset_root: PathBuf::from("assets"),
            ir: IrSource::default(),
            synthetic_ir: SyntheticIrSettings::default(),
            analyser_fft_size: 256,
            capture: CaptureConstraints::default(),
            initial_parameters: ParameterSet::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KtvError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        }

        let file = File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate", self.sample_rate, "> 0 Hz"));
        }
        if !(self.ramp_time_secs.is_finite() && self.ramp_time_secs > 0.0) {
            return Err(invalid("ramp_time_secs", self.ramp_time_secs, "> 0 s"));
        }
        let synthetic = &self.synthetic_ir;
        if !(synthetic.duration_secs.is_finite() && synthetic.duration_secs > 0.0) {
            return Err(invalid(
                "synthetic_ir.duration_secs",
                synthetic.duration_secs,
                "> 0 s",
            ));
        }
        if !(synthetic.decay.is_finite() && synthetic.decay > 0.0) {
            return Err(invalid("synthetic_ir.decay", synthetic.decay, "> 0 s"));
        }
        let fft = self.analyser_fft_size;
        if !fft.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft) {
            return Err(invalid(
                "analyser_fft_size",
                fft,
                &format!("a power of two from {} to {}", MIN_FFT_SIZE, MAX_FFT_SIZE),
            ));
        }
        if self.capture.channel_count == 0 {
            return Err(invalid("capture.channel_count", 0, ">= 1"));
        }
        self.initial_parameters.validate()
    }
}

fn invalid(param: &str, value: impl ToString, expected: &str) -> KtvError {
    KtvError::InvalidParameter {
        param: param.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}
