//! Processing context abstraction
//!
//! The engine never touches samples on the real-time path. It drives a
//! processing context made of standard units (gain, delay, biquad,
//! compressor, convolver, analyser, sources, destination) through the
//! [`AudioContext`] trait, the way a browser app drives Web Audio.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::buffer::AudioBuffer;
use crate::audio::capture::CaptureStream;
use crate::audio::decode::decode_audio;
use crate::error::Result;

/// Opaque identifier of a node inside one processing context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// The fixed set of processing unit kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Gain,
    Delay,
    BiquadFilter,
    DynamicsCompressor,
    Convolver,
    Analyser,
    StreamSource,
    BufferSource,
    Destination,
}

impl NodeRole {
    /// Automatable parameters carried by this kind of node
    pub fn params(&self) -> &'static [AudioParam] {
        match self {
            NodeRole::Gain => &[AudioParam::Gain],
            NodeRole::Delay => &[AudioParam::DelayTime],
            NodeRole::BiquadFilter => &[AudioParam::Frequency, AudioParam::Q, AudioParam::FilterGain],
            NodeRole::DynamicsCompressor => &[
                AudioParam::Threshold,
                AudioParam::Knee,
                AudioParam::Ratio,
                AudioParam::Attack,
                AudioParam::Release,
            ],
            _ => &[],
        }
    }

    /// Whether the node accepts inbound connections
    pub fn has_input(&self) -> bool {
        !matches!(self, NodeRole::StreamSource | NodeRole::BufferSource)
    }

    /// Whether the node can feed other nodes
    pub fn has_output(&self) -> bool {
        !matches!(self, NodeRole::Destination)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Gain => "gain",
            NodeRole::Delay => "delay",
            NodeRole::BiquadFilter => "biquad-filter",
            NodeRole::DynamicsCompressor => "dynamics-compressor",
            NodeRole::Convolver => "convolver",
            NodeRole::Analyser => "analyser",
            NodeRole::StreamSource => "stream-source",
            NodeRole::BufferSource => "buffer-source",
            NodeRole::Destination => "destination",
        };
        write!(f, "{}", name)
    }
}

/// Automatable node parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioParam {
    /// Linear gain
    Gain,
    /// Delay line length in seconds
    DelayTime,
    /// Filter corner/center frequency in Hz
    Frequency,
    /// Filter quality factor
    Q,
    /// Filter boost/cut in dB (peaking and shelving types)
    FilterGain,
    /// Compressor threshold in dB
    Threshold,
    /// Compressor knee width in dB
    Knee,
    /// Compressor ratio (input dB change per 1 dB of output)
    Ratio,
    /// Compressor attack in seconds
    Attack,
    /// Compressor release in seconds
    Release,
}

impl AudioParam {
    /// Value a freshly created node starts with
    pub fn default_value(&self) -> f32 {
        match self {
            AudioParam::Gain => 1.0,
            AudioParam::DelayTime => 0.0,
            AudioParam::Frequency => 350.0,
            AudioParam::Q => 1.0,
            AudioParam::FilterGain => 0.0,
            AudioParam::Threshold => -24.0,
            AudioParam::Knee => 30.0,
            AudioParam::Ratio => 12.0,
            AudioParam::Attack => 0.003,
            AudioParam::Release => 0.25,
        }
    }

    /// Nominal range; values are clamped into it when computed
    pub fn nominal_range(&self) -> (f32, f32) {
        match self {
            AudioParam::Gain => (f32::MIN, f32::MAX),
            AudioParam::DelayTime => (0.0, MAX_DELAY_TIME_SECS),
            AudioParam::Frequency => (0.0, 24000.0),
            AudioParam::Q => (0.0001, 1000.0),
            AudioParam::FilterGain => (-40.0, 40.0),
            AudioParam::Threshold => (-100.0, 0.0),
            AudioParam::Knee => (0.0, 40.0),
            AudioParam::Ratio => (1.0, 20.0),
            AudioParam::Attack => (0.0, 1.0),
            AudioParam::Release => (0.0, 1.0),
        }
    }
}

impl fmt::Display for AudioParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioParam::Gain => "gain",
            AudioParam::DelayTime => "delayTime",
            AudioParam::Frequency => "frequency",
            AudioParam::Q => "Q",
            AudioParam::FilterGain => "filterGain",
            AudioParam::Threshold => "threshold",
            AudioParam::Knee => "knee",
            AudioParam::Ratio => "ratio",
            AudioParam::Attack => "attack",
            AudioParam::Release => "release",
        };
        write!(f, "{}", name)
    }
}

/// Longest echo a delay node can hold, in seconds
pub const MAX_DELAY_TIME_SECS: f32 = 1.0;

/// Biquad response shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    Lowshelf,
    Highshelf,
    Peaking,
    Notch,
    Allpass,
}

/// Lifecycle of a processing context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Closed,
}

/// A live processing context
///
/// All methods are control-plane calls; the context applies them on its
/// own real-time thread.
pub trait AudioContext: Send {
    /// Rendering sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Context time in seconds, starting at 0 when the context is created
    fn current_time(&self) -> f64;

    fn state(&self) -> ContextState;

    /// The hardware output node
    fn destination(&self) -> NodeHandle;

    /// Create a processing node (not a stream source; see
    /// [`create_stream_source`](AudioContext::create_stream_source))
    fn create_node(&mut self, role: NodeRole) -> Result<NodeHandle>;

    /// Wrap a granted capture stream as a source node
    fn create_stream_source(&mut self, stream: &CaptureStream) -> Result<NodeHandle>;

    /// Add a directed edge. Cycles are allowed; duplicate edges are ignored.
    fn connect(&mut self, source: NodeHandle, target: NodeHandle) -> Result<()>;

    /// Remove every outbound edge of `node`
    fn disconnect(&mut self, node: NodeHandle) -> Result<()>;

    /// Set a parameter immediately, cancelling any ramp in flight
    fn set_param_value(&mut self, node: NodeHandle, param: AudioParam, value: f32) -> Result<()>;

    /// Exponentially approach `target` from `start_time`, with
    /// `time_constant` seconds to cover ~63% of the distance. Supersedes
    /// any ramp in flight on the same parameter.
    fn set_target_at_time(
        &mut self,
        node: NodeHandle,
        param: AudioParam,
        target: f32,
        start_time: f64,
        time_constant: f64,
    ) -> Result<()>;

    /// Parameter value at the current context time
    fn param_value(&self, node: NodeHandle, param: AudioParam) -> Result<f32>;

    fn set_filter_type(&mut self, node: NodeHandle, filter_type: FilterType) -> Result<()>;

    /// Bind the convolution kernel
    fn set_convolver_buffer(&mut self, node: NodeHandle, buffer: Arc<AudioBuffer>) -> Result<()>;

    fn set_analyser_fft_size(&mut self, node: NodeHandle, fft_size: usize) -> Result<()>;

    /// Start a buffer source at `offset` seconds into the buffer. A source
    /// node can only be started once.
    fn start_buffer_source(
        &mut self,
        node: NodeHandle,
        buffer: Arc<AudioBuffer>,
        looping: bool,
        offset: f64,
    ) -> Result<()>;

    /// Stop a started buffer source; stopping twice is harmless
    fn stop_source(&mut self, node: NodeHandle) -> Result<()>;

    /// Shut the context down and release its output device
    fn close(&mut self) -> Result<()>;

    /// Decode encoded audio at this context's sample rate
    fn decode_audio_data(&self, bytes: &[u8]) -> Result<AudioBuffer> {
        decode_audio(bytes, self.sample_rate())
    }
}

/// Creates a fresh processing context for every session
pub trait ContextFactory: Send {
    fn create(&mut self, sample_rate: u32) -> Result<Box<dyn AudioContext>>;
}
