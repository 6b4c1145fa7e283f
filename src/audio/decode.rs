//! Audio decoding and WAV export
//!
//! Uploaded tracks and impulse responses arrive as encoded bytes. They are
//! decoded to 32-bit float and resampled to the processing context's rate,
//! the same contract a browser's `decodeAudioData` gives. WAV goes through
//! `hound`; everything else is probed with `symphonia`.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::buffer::AudioBuffer;
use crate::error::{KtvError, Result};

/// Decode encoded audio bytes and resample to `target_rate`
///
/// # Errors
/// * `Decode` - empty input, unknown container, corrupt stream or zero frames
pub fn decode_audio(bytes: &[u8], target_rate: u32) -> Result<AudioBuffer> {
    let decoded = decode_audio_native(bytes)?;
    resample(&decoded, target_rate)
}

/// Decode encoded audio bytes at the stream's own sample rate
///
/// WAV files `hound` cannot read (ADPCM, A-law, mu-law) are handed to
/// `symphonia` before giving up.
///
/// # Errors
/// * `Decode` - empty input, unknown container, corrupt stream or zero frames
pub fn decode_audio_native(bytes: &[u8]) -> Result<AudioBuffer> {
    if bytes.is_empty() {
        return Err(KtvError::decode("no data"));
    }

    let (interleaved, channels, source_rate) = if is_riff_wave(bytes) {
        match decode_wav(bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(error = %e, "hound rejected WAV, retrying with symphonia");
                decode_with_symphonia(bytes).map_err(|_| e)?
            }
        }
    } else {
        decode_with_symphonia(bytes)?
    };

    if channels == 0 || interleaved.len() < channels {
        return Err(KtvError::decode("stream contains no audio frames"));
    }

    AudioBuffer::from_interleaved(&interleaved, channels, source_rate)
}

/// Resample `buffer` to `target_rate`; a buffer already at that rate is cloned
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    if buffer.sample_rate() == target_rate {
        return Ok(buffer.clone());
    }
    let resampled = resample_channels(buffer.samples(), buffer.sample_rate(), target_rate);
    AudioBuffer::from_channels(resampled, target_rate)
}

/// Write a buffer to disk as 32-bit float WAV
pub fn export_wav(buffer: &AudioBuffer, path: &Path) -> Result<()> {
    let spec = WavSpec {
        channels: buffer.channels() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec).map_err(hound_io_error)?;
    for sample in buffer.to_interleaved() {
        writer.write_sample(sample).map_err(hound_io_error)?;
    }
    writer.finalize().map_err(hound_io_error)?;

    Ok(())
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn is_riff_wave(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn hound_io_error(e: hound::Error) -> KtvError {
    match e {
        hound::Error::IoError(io) => KtvError::Io(io),
        other => KtvError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            other.to_string(),
        )),
    }
}

fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, usize, u32)> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| KtvError::Decode {
        reason: format!("invalid WAV header: {}", e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    Ok((samples, spec.channels as usize, spec.sample_rate))
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let to_decode_error = |e: hound::Error| KtvError::Decode {
        reason: format!("failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(Box::new(e)),
    };

    match (sample_format, bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(to_decode_error),
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(to_decode_error),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(to_decode_error),
        // 24-bit stored as i32 in hound
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(to_decode_error),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(to_decode_error),
        (SampleFormat::Int, bits) => Err(KtvError::decode(format!(
            "unsupported {}-bit integer WAV",
            bits
        ))),
    }
}

fn decode_with_symphonia(bytes: &[u8]) -> Result<(Vec<f32>, usize, u32)> {
    let to_decode_error = |e: SymphoniaError| KtvError::Decode {
        reason: e.to_string(),
        source: Some(Box::new(e)),
    };

    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(to_decode_error)?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| KtvError::decode("no decodable audio track"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(to_decode_error)?;

    let mut interleaved = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(to_decode_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt packet is skipped; the rest of the stream may be fine
            Err(SymphoniaError::DecodeError(reason)) => {
                tracing::debug!(reason, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(to_decode_error(e)),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();

        let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(samples.samples());
    }

    if sample_rate == 0 {
        return Err(KtvError::decode("stream has no sample rate"));
    }

    Ok((interleaved, channels, sample_rate))
}

/// Resample audio channels to a different sample rate
fn resample_channels(channels: &[Vec<f32>], source_rate: u32, target_rate: u32) -> Vec<Vec<f32>> {
    let ratio = target_rate as f64 / source_rate as f64;

    channels
        .iter()
        .map(|channel| resample_linear(channel, ratio))
        .collect()
}

/// Linear interpolation resampling
///
/// Good enough for reverb kernels and backing tracks; aliasing on large
/// downsampling ratios is audible only on bright material.
fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).round() as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < source_len {
            samples[src_idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn wav_bytes(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                for ch in 0..channels {
                    let value = ((i + ch as usize) % 100) as i16 * 100;
                    writer.write_sample(value).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_wav_same_rate_keeps_length() {
        let bytes = wav_bytes(2, 48000, 48000);
        let buffer = decode_audio(&bytes, 48000).unwrap();

        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.len(), 48000);
        assert_eq!(buffer.sample_rate(), 48000);
    }

    #[test]
    fn test_decode_wav_resamples_to_target_rate() {
        let bytes = wav_bytes(1, 44100, 44100);
        let buffer = decode_audio(&bytes, 48000).unwrap();

        assert_eq!(buffer.sample_rate(), 48000);
        assert!((buffer.len() as i64 - 48000).abs() <= 1);
    }

    fn mulaw_wav_bytes(sample_rate: u32, frames: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(4 + 26 + 8 + frames as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&18u32.to_le_bytes());
        bytes.extend_from_slice(&7u16.to_le_bytes()); // WAVE_FORMAT_MULAW
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&8u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&(frames as u32).to_le_bytes());
        bytes.extend(std::iter::repeat(0xFFu8).take(frames));
        bytes
    }

    #[test]
    fn test_wav_hound_cannot_read_goes_through_symphonia() {
        let bytes = mulaw_wav_bytes(8000, 800);
        assert!(decode_wav(&bytes).is_err());

        let buffer = decode_audio_native(&bytes).unwrap();
        assert_eq!(buffer.channels(), 1);
        assert_eq!(buffer.sample_rate(), 8000);
        assert_eq!(buffer.len(), 800);
    }

    #[test]
    fn test_native_decode_keeps_source_rate() {
        let bytes = wav_bytes(2, 22050, 2205);
        let native = decode_audio_native(&bytes).unwrap();
        assert_eq!(native.sample_rate(), 22050);
        assert_eq!(native.len(), 2205);

        let resampled = resample(&native, 44100).unwrap();
        assert_eq!(resampled.sample_rate(), 44100);
        assert_eq!(resampled.len(), 4410);
        assert_eq!(resample(&native, 22050).unwrap(), native);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_audio(b"definitely not audio at all", 48000).unwrap_err();
        assert_eq!(err.error_code(), "DECODE_ERROR");
    }

    #[test]
    fn test_decode_rejects_truncated_wav() {
        let bytes = wav_bytes(1, 48000, 100);
        let err = decode_audio(&bytes[..20], 48000).unwrap_err();
        assert_eq!(err.error_code(), "DECODE_ERROR");
    }

    #[test]
    fn test_decode_rejects_empty_input() {
        assert!(decode_audio(&[], 48000).is_err());
    }

    #[test]
    fn test_export_then_decode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ir.wav");
        let mut buffer = AudioBuffer::silent(2, 4800, 48000);
        buffer.channel_mut(1).unwrap()[10] = 0.25;

        export_wav(&buffer, &path).unwrap();
        let decoded = decode_audio(&std::fs::read(&path).unwrap(), 48000).unwrap();

        assert_eq!(decoded.len(), 4800);
        assert_eq!(decoded.channel(1).unwrap()[10], 0.25);
    }

    #[test]
    fn test_resample_linear_lengths() {
        let samples = vec![0.0_f32; 1000];
        assert_eq!(resample_linear(&samples, 2.0).len(), 2000);
        assert_eq!(resample_linear(&samples, 0.5).len(), 500);
        assert!(resample_linear(&[], 2.0).is_empty());
    }
}
