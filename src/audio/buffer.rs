//! Audio Buffer
//!
//! Decoded audio held in memory: backing tracks and impulse responses.
//! Samples are stored non-interleaved as 32-bit float, one `Vec` per channel.

use crate::error::{KtvError, Result};

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert linear amplitude to decibels
///
/// Returns `f32::NEG_INFINITY` for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Multi-channel sample buffer
///
/// Once handed to a convolver or buffer source (wrapped in an `Arc`) the
/// buffer is never mutated again.
///
/// # Example
/// ```
/// use ktv::audio::AudioBuffer;
///
/// let buffer = AudioBuffer::silent(2, 48000, 48000);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.len(), 48000);
/// assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a zeroed buffer
    pub fn silent(channels: usize, frames: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; frames]; channels],
            sample_rate,
        }
    }

    /// Build a buffer from per-channel sample vectors
    ///
    /// All channels must have the same length and there must be at least one.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        let Some(first) = samples.first() else {
            return Err(KtvError::decode("audio has no channels"));
        };
        let frames = first.len();
        if samples.iter().any(|ch| ch.len() != frames) {
            return Err(KtvError::decode("channels have different lengths"));
        }
        if sample_rate == 0 {
            return Err(KtvError::decode("sample rate is zero"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create an audio buffer from interleaved sample data
    pub fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(KtvError::decode("audio has no channels"));
        }

        if interleaved.len() % channels != 0 {
            return Err(KtvError::decode(format!(
                "interleaved data length {} is not divisible by channel count {}",
                interleaved.len(),
                channels
            )));
        }

        let frames = interleaved.len() / channels;
        let mut samples = vec![Vec::with_capacity(frames); channels];

        for frame in interleaved.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Self::from_channels(samples, sample_rate)
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ... for stereo)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(self.channels() * self.len());
        for frame in 0..self.len() {
            for channel in &self.samples {
                interleaved.push(channel[frame]);
            }
        }
        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of frames (samples per channel)
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer holds no frames
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Read-only view of one channel
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.samples.get(index).map(|ch| ch.as_slice())
    }

    /// Mutable view of one channel
    pub fn channel_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        self.samples.get_mut(index).map(|ch| ch.as_mut_slice())
    }

    /// All channels
    pub fn samples(&self) -> &[Vec<f32>] {
        &self.samples
    }

    /// Peak absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|&s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// Peak level in dBFS
    pub fn peak_db(&self) -> f32 {
        linear_to_db(self.peak())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_interleave_round_trip_layout() {
        let interleaved = [0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
        let buffer = AudioBuffer::from_interleaved(&interleaved, 2, 48000).unwrap();

        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.channel(0).unwrap(), &[0.1, 0.2, 0.3]);
        assert_eq!(buffer.channel(1).unwrap(), &[-0.1, -0.2, -0.3]);
        assert_eq!(buffer.to_interleaved(), interleaved.to_vec());
    }

    #[test]
    fn test_from_interleaved_rejects_ragged_data() {
        let err = AudioBuffer::from_interleaved(&[0.0; 5], 2, 48000).unwrap_err();
        assert_eq!(err.error_code(), "DECODE_ERROR");
    }

    #[test]
    fn test_from_channels_rejects_mismatched_lengths() {
        let result = AudioBuffer::from_channels(vec![vec![0.0; 4], vec![0.0; 3]], 44100);
        assert!(result.is_err());
        assert!(AudioBuffer::from_channels(Vec::new(), 44100).is_err());
    }

    #[test]
    fn test_duration_and_peak() {
        let mut buffer = AudioBuffer::silent(1, 24000, 48000);
        buffer.channel_mut(0).unwrap()[100] = -0.5;

        assert_relative_eq!(buffer.duration_secs(), 0.5);
        assert_relative_eq!(buffer.peak(), 0.5);
        assert_relative_eq!(buffer.peak_db(), -6.0206, epsilon = 1e-3);
    }

    #[test]
    fn test_db_conversions() {
        assert_relative_eq!(linear_to_db(1.0), 0.0);
        assert_relative_eq!(linear_to_db(0.1), -20.0, epsilon = 1e-4);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
    }
}
