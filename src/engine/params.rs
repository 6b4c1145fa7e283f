//! Mix parameters and the controller that ramps them onto live nodes
//!
//! Every tunable value moves with an exponential approach rather than an
//! instantaneous step, so slider drags never click. A new call supersedes
//! whatever target each parameter was still approaching.

use serde::{Deserialize, Serialize};

use crate::audio::{AudioContext, AudioParam, NodeHandle};
use crate::error::{KtvError, Result};
use crate::graph::{KaraokeGraph, TypedNode};

/// Default smoothing time constant in seconds
pub const DEFAULT_RAMP_SECS: f64 = 0.05;

const GAIN_RANGE: (f32, f32) = (0.0, 1.5);
const DELAY_RANGE: (f32, f32) = (0.05, 1.0);
const THRESHOLD_RANGE: (f32, f32) = (-60.0, 0.0);
const RATIO_RANGE: (f32, f32) = (1.0, 20.0);
const KNEE_RANGE: (f32, f32) = (0.0, 40.0);
const ATTACK_RANGE: (f32, f32) = (0.0, 0.1);
const RELEASE_RANGE: (f32, f32) = (0.01, 1.0);

/// Flat record of every runtime-tunable mix value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSet {
    /// Microphone level (linear, 0 to 1.5)
    pub mic: f32,
    /// Backing track level (linear, 0 to 1.5)
    pub music: f32,
    /// Echo feedback amount (linear, 0 to 1.5)
    pub echo: f32,
    /// Reverb send level (linear, 0 to 1.5)
    pub reverb: f32,
    /// Echo delay time in seconds (0.05 to 1)
    pub delay: f32,
    /// Compressor threshold in dB (-60 to 0)
    pub threshold: f32,
    /// Compression ratio (1 to 20)
    pub ratio: f32,
    /// Knee width in dB (0 to 40)
    pub knee: f32,
    /// Attack time in seconds (0 to 0.1)
    pub attack: f32,
    /// Release time in seconds (0.01 to 1)
    pub release: f32,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            mic: 0.8,
            music: 0.6,
            echo: 0.3,
            reverb: 0.3,
            delay: 0.2,
            threshold: -35.0,
            ratio: 12.0,
            knee: 30.0,
            attack: 0.003,
            release: 0.25,
        }
    }
}

impl ParameterSet {
    /// Validate every field against its allowed range
    ///
    /// # Errors
    /// * `InvalidParameter` - names the first out-of-range field
    pub fn validate(&self) -> Result<()> {
        for (name, value, range, unit) in self.fields() {
            if value.is_nan() || value < range.0 || value > range.1 {
                return Err(KtvError::InvalidParameter {
                    param: name.to_string(),
                    value: value.to_string(),
                    expected: format!("{} to {}{}", range.0, range.1, unit),
                });
            }
        }
        Ok(())
    }

    /// Clamp parameters to valid ranges; NaN falls back to the default
    pub fn clamp(&mut self) {
        let defaults = Self::default();
        let fix = |value: f32, default: f32, range: (f32, f32)| {
            if value.is_nan() {
                default
            } else {
                value.clamp(range.0, range.1)
            }
        };
        self.mic = fix(self.mic, defaults.mic, GAIN_RANGE);
        self.music = fix(self.music, defaults.music, GAIN_RANGE);
        self.echo = fix(self.echo, defaults.echo, GAIN_RANGE);
        self.reverb = fix(self.reverb, defaults.reverb, GAIN_RANGE);
        self.delay = fix(self.delay, defaults.delay, DELAY_RANGE);
        self.threshold = fix(self.threshold, defaults.threshold, THRESHOLD_RANGE);
        self.ratio = fix(self.ratio, defaults.ratio, RATIO_RANGE);
        self.knee = fix(self.knee, defaults.knee, KNEE_RANGE);
        self.attack = fix(self.attack, defaults.attack, ATTACK_RANGE);
        self.release = fix(self.release, defaults.release, RELEASE_RANGE);
    }

    /// In-range copy of this set
    pub fn clamped(&self) -> Self {
        let mut copy = *self;
        copy.clamp();
        copy
    }

    fn fields(&self) -> [(&'static str, f32, (f32, f32), &'static str); 10] {
        [
            ("mic", self.mic, GAIN_RANGE, ""),
            ("music", self.music, GAIN_RANGE, ""),
            ("echo", self.echo, GAIN_RANGE, ""),
            ("reverb", self.reverb, GAIN_RANGE, ""),
            ("delay", self.delay, DELAY_RANGE, " s"),
            ("threshold", self.threshold, THRESHOLD_RANGE, " dB"),
            ("ratio", self.ratio, RATIO_RANGE, ""),
            ("knee", self.knee, KNEE_RANGE, " dB"),
            ("attack", self.attack, ATTACK_RANGE, " s"),
            ("release", self.release, RELEASE_RANGE, " s"),
        ]
    }
}

/// Check a ramp time constant
///
/// # Errors
/// * `InvalidParameter` - the value is negative, NaN or infinite
pub fn validate_ramp(ramp_secs: f64) -> Result<()> {
    if !ramp_secs.is_finite() || ramp_secs < 0.0 {
        return Err(KtvError::InvalidParameter {
            param: "ramp_time_secs".to_string(),
            value: ramp_secs.to_string(),
            expected: "a finite value >= 0 s".to_string(),
        });
    }
    Ok(())
}

/// Maps a [`ParameterSet`] onto the nodes of a built graph
#[derive(Debug, Clone, Copy)]
pub struct ParameterController {
    ramp_secs: f64,
}

impl Default for ParameterController {
    fn default() -> Self {
        Self {
            ramp_secs: DEFAULT_RAMP_SECS,
        }
    }
}

impl ParameterController {
    pub fn new(ramp_secs: f64) -> Result<Self> {
        validate_ramp(ramp_secs)?;
        Ok(Self { ramp_secs })
    }

    pub fn ramp_secs(&self) -> f64 {
        self.ramp_secs
    }

    /// Node parameter targets for a set, in application order
    pub fn targets(graph: &KaraokeGraph, set: &ParameterSet) -> [(NodeHandle, AudioParam, f32); 10] {
        let compressor = graph.compressor.handle();
        [
            (graph.mic_gain.handle(), AudioParam::Gain, set.mic),
            (graph.music_gain.handle(), AudioParam::Gain, set.music),
            (graph.echo_feedback.handle(), AudioParam::Gain, set.echo),
            (graph.reverb_gain.handle(), AudioParam::Gain, set.reverb),
            (graph.echo_delay.handle(), AudioParam::DelayTime, set.delay),
            (compressor, AudioParam::Threshold, set.threshold),
            (compressor, AudioParam::Ratio, set.ratio),
            (compressor, AudioParam::Knee, set.knee),
            (compressor, AudioParam::Attack, set.attack),
            (compressor, AudioParam::Release, set.release),
        ]
    }

    /// Ramp every parameter toward `set` with the controller's ramp time
    pub fn apply(
        &self,
        ctx: &mut dyn AudioContext,
        graph: &KaraokeGraph,
        set: &ParameterSet,
    ) -> Result<ParameterSet> {
        self.apply_with_ramp(ctx, graph, set, self.ramp_secs)
    }

    /// Ramp every parameter toward `set` over `ramp_secs`
    ///
    /// Out-of-range values are clamped (with a warning) rather than
    /// rejected. Returns the set that was actually scheduled.
    ///
    /// # Errors
    /// * `InvalidParameter` - `ramp_secs` is negative or NaN
    pub fn apply_with_ramp(
        &self,
        ctx: &mut dyn AudioContext,
        graph: &KaraokeGraph,
        set: &ParameterSet,
        ramp_secs: f64,
    ) -> Result<ParameterSet> {
        validate_ramp(ramp_secs)?;

        let applied = match set.validate() {
            Ok(()) => *set,
            Err(e) => {
                tracing::warn!(error = %e, "parameter set out of range, clamping");
                set.clamped()
            }
        };

        let now = ctx.current_time();
        for (node, param, target) in Self::targets(graph, &applied) {
            ctx.set_target_at_time(node, param, target, now, ramp_secs)?;
        }

        tracing::debug!(ramp_secs, ?applied, "parameters scheduled");
        Ok(applied)
    }
}
