//! Impulse Response Provider
//!
//! Produces the convolution kernel for the reverb send: a recorded IR from
//! the bundled assets when it can be loaded, otherwise exponentially
//! decaying white noise.

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::audio::{resample, AssetSource, AudioBuffer, AudioContext};
use crate::error::{KtvError, Result};

/// Synthetic IRs are stereo with decorrelated channels
pub const SYNTHETIC_IR_CHANNELS: usize = 2;

/// Bundled recorded IR
pub const DEFAULT_IR_ASSET: &str = "plate01.wav";

/// Shape of the generated fallback IR
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticIrSettings {
    /// Length of the tail in seconds
    pub duration_secs: f64,
    /// Decay time constant in seconds
    pub decay: f64,
    /// Fixed RNG seed for reproducible tails
    pub seed: Option<u64>,
}

impl Default for SyntheticIrSettings {
    fn default() -> Self {
        Self {
            duration_secs: 2.0,
            decay: 0.5,
            seed: None,
        }
    }
}

/// Where the session's IR should come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IrSource {
    /// Recorded IR under the asset root
    StaticAsset { path: String },
    /// Always generate
    Synthetic,
}

impl Default for IrSource {
    fn default() -> Self {
        IrSource::StaticAsset {
            path: DEFAULT_IR_ASSET.to_string(),
        }
    }
}

/// Where the IR bound to a session's convolver actually came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrOrigin {
    Recorded { path: String },
    Custom,
    Synthetic,
    /// The recorded IR failed to load and the generator stood in
    SyntheticFallback { reason: String },
}

impl IrOrigin {
    pub fn is_fallback(&self) -> bool {
        matches!(self, IrOrigin::SyntheticFallback { .. })
    }
}

impl fmt::Display for IrOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrOrigin::Recorded { path } => write!(f, "recorded ({})", path),
            IrOrigin::Custom => write!(f, "custom upload"),
            IrOrigin::Synthetic => write!(f, "synthetic"),
            IrOrigin::SyntheticFallback { reason } => write!(f, "synthetic fallback ({})", reason),
        }
    }
}

/// Generate an exponentially decaying white-noise IR
///
/// `sample[i] = uniform(-1, 1) * exp(-i / (sample_rate * decay))`, drawn
/// independently per channel.
///
/// # Example
/// ```
/// use ktv::engine::ir::generate_synthetic_ir;
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let mut rng = StdRng::seed_from_u64(7);
/// let ir = generate_synthetic_ir(48000, 2.0, 0.5, &mut rng).unwrap();
/// assert_eq!(ir.channels(), 2);
/// assert_eq!(ir.len(), 96000);
/// ```
pub fn generate_synthetic_ir<R: Rng>(
    sample_rate: u32,
    duration_secs: f64,
    decay: f64,
    rng: &mut R,
) -> Result<AudioBuffer> {
    if sample_rate == 0 {
        return Err(KtvError::InvalidParameter {
            param: "sample_rate".to_string(),
            value: sample_rate.to_string(),
            expected: "> 0 Hz".to_string(),
        });
    }
    if !(duration_secs.is_finite() && duration_secs > 0.0) {
        return Err(KtvError::InvalidParameter {
            param: "duration_secs".to_string(),
            value: duration_secs.to_string(),
            expected: "> 0 s".to_string(),
        });
    }
    if !(decay.is_finite() && decay > 0.0) {
        return Err(KtvError::InvalidParameter {
            param: "decay".to_string(),
            value: decay.to_string(),
            expected: "> 0 s".to_string(),
        });
    }

    let frames = ((duration_secs * sample_rate as f64).round() as usize).max(1);
    let samples_per_tau = sample_rate as f64 * decay;

    let channels: Vec<Vec<f32>> = (0..SYNTHETIC_IR_CHANNELS)
        .map(|_| {
            (0..frames)
                .map(|i| {
                    let envelope = (-(i as f64) / samples_per_tau).exp();
                    (rng.gen_range(-1.0f64..1.0) * envelope) as f32
                })
                .collect()
        })
        .collect();

    AudioBuffer::from_channels(channels, sample_rate)
}

/// Decode an uploaded or bundled IR at the context's sample rate
///
/// # Errors
/// * `Decode` - the bytes are not decodable audio
pub fn load_ir_from_bytes(ctx: &dyn AudioContext, bytes: &[u8]) -> Result<AudioBuffer> {
    let buffer = ctx.decode_audio_data(bytes)?;
    if buffer.is_empty() {
        return Err(KtvError::decode("impulse response contains no samples"));
    }
    Ok(buffer)
}

/// Fetch a bundled IR and decode it
///
/// # Errors
/// * `Fetch` - the asset could not be read
/// * `Decode` - the asset is not decodable audio
pub fn load_ir_from_static_asset(
    ctx: &dyn AudioContext,
    assets: &dyn AssetSource,
    path: &str,
) -> Result<AudioBuffer> {
    let bytes = assets.fetch(path)?;
    load_ir_from_bytes(ctx, &bytes)
}

/// Picks the IR for a new session
pub struct ImpulseResponseProvider<'a> {
    assets: &'a dyn AssetSource,
    settings: SyntheticIrSettings,
}

impl<'a> ImpulseResponseProvider<'a> {
    pub fn new(assets: &'a dyn AssetSource, settings: SyntheticIrSettings) -> Self {
        Self { assets, settings }
    }

    /// Resolve `source` to a kernel at the context's sample rate
    ///
    /// A custom IR wins when present and is resampled if the context runs at
    /// another rate. A recorded IR that fails to fetch or
    /// decode is replaced by the synthetic one; the failure is logged and
    /// reported through the returned [`IrOrigin`].
    ///
    /// # Errors
    /// Only if the synthetic generator is misconfigured or a custom IR cannot
    /// be resampled.
    pub fn select<R: Rng>(
        &self,
        ctx: &dyn AudioContext,
        source: &IrSource,
        custom: Option<&Arc<AudioBuffer>>,
        rng: &mut R,
    ) -> Result<(Arc<AudioBuffer>, IrOrigin)> {
        if let Some(buffer) = custom {
            let kernel = if buffer.sample_rate() == ctx.sample_rate() {
                Arc::clone(buffer)
            } else {
                tracing::debug!(
                    from = buffer.sample_rate(),
                    to = ctx.sample_rate(),
                    "resampling custom impulse response"
                );
                Arc::new(resample(buffer, ctx.sample_rate())?)
            };
            return Ok((kernel, IrOrigin::Custom));
        }

        match source {
            IrSource::Synthetic => Ok((self.synthesize(ctx, rng)?, IrOrigin::Synthetic)),
            IrSource::StaticAsset { path } => {
                match load_ir_from_static_asset(ctx, self.assets, path) {
                    Ok(buffer) => {
                        tracing::debug!(
                            path = %path,
                            channels = buffer.channels(),
                            duration_secs = buffer.duration_secs(),
                            "loaded recorded impulse response"
                        );
                        Ok((Arc::new(buffer), IrOrigin::Recorded { path: path.clone() }))
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path,
                            error = %e,
                            "recorded impulse response unavailable, using synthetic reverb"
                        );
                        let reason = e.to_string();
                        Ok((
                            self.synthesize(ctx, rng)?,
                            IrOrigin::SyntheticFallback { reason },
                        ))
                    }
                }
            }
        }
    }

    fn synthesize<R: Rng>(&self, ctx: &dyn AudioContext, rng: &mut R) -> Result<Arc<AudioBuffer>> {
        generate_synthetic_ir(
            ctx.sample_rate(),
            self.settings.duration_secs,
            self.settings.decay,
            rng,
        )
        .map(Arc::new)
    }
}
