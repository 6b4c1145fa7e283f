//! Topology Builder
//!
//! Instantiates every node of the karaoke mix and wires the fixed signal
//! flow:
//!
//! ```text
//!                                        ┌──── echo_filter <─────┐
//!                                        v                       │
//! mic ─> low_cut ─> presence ─> mic_gain ┬─> echo_delay ─> echo_feedback ┬─> compressor ┬─> destination
//!  │                                     ├─> convolver ─> reverb_gain ───┤              └─> output_analyser
//!  └─> mic_analyser                      └───────── dry ─────────────────┤
//!                                             music_gain ────────────────┘
//! ```
//!
//! The shape is declared once per session and sealed; afterwards only node
//! parameters change.

use std::sync::Arc;

use crate::audio::{AudioBuffer, AudioContext, AudioParam, CaptureStream, FilterType, NodeRole};
use crate::error::Result;
use crate::graph::node::{
    AnalyserNode, BiquadFilterNode, CompressorNode, ConvolverNode, DelayNode, DestinationNode,
    GainNode, StreamSourceNode, TypedNode,
};
use crate::graph::registry::NodeRegistry;

/// Session-unique node names
pub mod names {
    pub const MIC_SOURCE: &str = "mic_source";
    pub const MIC_ANALYSER: &str = "mic_analyser";
    pub const LOW_CUT_FILTER: &str = "low_cut_filter";
    pub const PRESENCE_FILTER: &str = "presence_filter";
    pub const MIC_GAIN: &str = "mic_gain";
    pub const ECHO_DELAY: &str = "echo_delay";
    pub const ECHO_FEEDBACK: &str = "echo_feedback";
    pub const ECHO_FILTER: &str = "echo_filter";
    pub const CONVOLVER: &str = "convolver";
    pub const REVERB_GAIN: &str = "reverb_gain";
    pub const MUSIC_GAIN: &str = "music_gain";
    pub const COMPRESSOR: &str = "compressor";
    pub const OUTPUT_ANALYSER: &str = "output_analyser";
    pub const DESTINATION: &str = "destination";

    /// Name of the microphone capture stream
    pub const MIC_STREAM: &str = "mic";
}

use names::*;

/// Nodes created through `create_node`; the mic source and the destination
/// come from the capture stream and the context
const PROCESSING_NODES: &[(&str, NodeRole)] = &[
    (MIC_ANALYSER, NodeRole::Analyser),
    (LOW_CUT_FILTER, NodeRole::BiquadFilter),
    (PRESENCE_FILTER, NodeRole::BiquadFilter),
    (MIC_GAIN, NodeRole::Gain),
    (ECHO_DELAY, NodeRole::Delay),
    (ECHO_FEEDBACK, NodeRole::Gain),
    (ECHO_FILTER, NodeRole::BiquadFilter),
    (CONVOLVER, NodeRole::Convolver),
    (REVERB_GAIN, NodeRole::Gain),
    (MUSIC_GAIN, NodeRole::Gain),
    (COMPRESSOR, NodeRole::DynamicsCompressor),
    (OUTPUT_ANALYSER, NodeRole::Analyser),
];

/// The signal flow as chains; each chain connects its consecutive pairs.
/// The echo chain ends where it started, closing the feedback loop.
pub const SIGNAL_FLOW: &[&[&str]] = &[
    &[MIC_SOURCE, MIC_ANALYSER],
    &[MIC_SOURCE, LOW_CUT_FILTER, PRESENCE_FILTER, MIC_GAIN, COMPRESSOR],
    &[MIC_GAIN, ECHO_DELAY, ECHO_FEEDBACK, ECHO_FILTER, ECHO_DELAY],
    &[ECHO_FEEDBACK, COMPRESSOR],
    &[MIC_GAIN, CONVOLVER, REVERB_GAIN, COMPRESSOR],
    &[MUSIC_GAIN, COMPRESSOR],
    &[COMPRESSOR, OUTPUT_ANALYSER],
    &[COMPRESSOR, DESTINATION],
];

/// Every directed edge of [`SIGNAL_FLOW`]
pub fn fixed_edges() -> Vec<(&'static str, &'static str)> {
    SIGNAL_FLOW
        .iter()
        .flat_map(|chain| chain.windows(2).map(|pair| (pair[0], pair[1])))
        .collect()
}

/// Coefficients set once at build time and never ramped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticCoefficients {
    /// High-pass corner removing handling noise and plosive rumble, Hz
    pub low_cut_hz: f32,
    /// Peaking boost center for vocal intelligibility, Hz
    pub presence_hz: f32,
    pub presence_q: f32,
    pub presence_gain_db: f32,
    /// Low-pass corner darkening each echo repeat, Hz
    pub echo_lowpass_hz: f32,
    pub analyser_fft_size: usize,
}

impl Default for StaticCoefficients {
    fn default() -> Self {
        Self {
            low_cut_hz: 200.0,
            presence_hz: 3500.0,
            presence_q: 1.2,
            presence_gain_db: 4.0,
            echo_lowpass_hz: 3000.0,
            analyser_fft_size: 256,
        }
    }
}

/// Typed handles of every node in the fixed topology, resolved once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KaraokeGraph {
    pub mic_source: StreamSourceNode,
    pub mic_analyser: AnalyserNode,
    pub low_cut_filter: BiquadFilterNode,
    pub presence_filter: BiquadFilterNode,
    pub mic_gain: GainNode,
    pub echo_delay: DelayNode,
    pub echo_feedback: GainNode,
    pub echo_filter: BiquadFilterNode,
    pub convolver: ConvolverNode,
    pub reverb_gain: GainNode,
    pub music_gain: GainNode,
    pub compressor: CompressorNode,
    pub output_analyser: AnalyserNode,
    pub destination: DestinationNode,
}

impl KaraokeGraph {
    /// Resolve every fixed node from the registry
    ///
    /// # Errors
    /// * `GraphReference` - a node is missing or registered with the wrong role
    pub fn resolve(registry: &NodeRegistry) -> Result<Self> {
        Ok(Self {
            mic_source: registry.get(MIC_SOURCE)?,
            mic_analyser: registry.get(MIC_ANALYSER)?,
            low_cut_filter: registry.get(LOW_CUT_FILTER)?,
            presence_filter: registry.get(PRESENCE_FILTER)?,
            mic_gain: registry.get(MIC_GAIN)?,
            echo_delay: registry.get(ECHO_DELAY)?,
            echo_feedback: registry.get(ECHO_FEEDBACK)?,
            echo_filter: registry.get(ECHO_FILTER)?,
            convolver: registry.get(CONVOLVER)?,
            reverb_gain: registry.get(REVERB_GAIN)?,
            music_gain: registry.get(MUSIC_GAIN)?,
            compressor: registry.get(COMPRESSOR)?,
            output_analyser: registry.get(OUTPUT_ANALYSER)?,
            destination: registry.get(DESTINATION)?,
        })
    }
}

/// Connect every edge of [`SIGNAL_FLOW`] through the registry
///
/// # Errors
/// * `GraphReference` - a node named by the flow was never registered
pub fn wire_signal_flow(ctx: &mut dyn AudioContext, registry: &mut NodeRegistry) -> Result<()> {
    for chain in SIGNAL_FLOW {
        registry.connect_chain(ctx, chain)?;
    }
    Ok(())
}

/// Builds the karaoke topology into an empty registry
pub struct TopologyBuilder<'a> {
    ctx: &'a mut dyn AudioContext,
    registry: &'a mut NodeRegistry,
    coefficients: StaticCoefficients,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(ctx: &'a mut dyn AudioContext, registry: &'a mut NodeRegistry) -> Self {
        Self {
            ctx,
            registry,
            coefficients: StaticCoefficients::default(),
        }
    }

    pub fn with_coefficients(mut self, coefficients: StaticCoefficients) -> Self {
        self.coefficients = coefficients;
        self
    }

    /// Register the capture stream, create all nodes, bind the impulse
    /// response, wire the signal flow and seal the registry
    pub fn build(self, stream: CaptureStream, impulse_response: Arc<AudioBuffer>) -> Result<KaraokeGraph> {
        let Self {
            ctx,
            registry,
            coefficients,
        } = self;

        registry.insert_stream(MIC_STREAM, stream)?;
        let mic = ctx.create_stream_source(registry.stream(MIC_STREAM)?)?;
        registry.insert(MIC_SOURCE, NodeRole::StreamSource, mic)?;
        registry.insert(DESTINATION, NodeRole::Destination, ctx.destination())?;

        for &(name, role) in PROCESSING_NODES {
            let handle = ctx.create_node(role)?;
            registry.insert(name, role, handle)?;
        }

        let graph = KaraokeGraph::resolve(registry)?;
        configure_static_nodes(ctx, &graph, &coefficients, impulse_response)?;

        wire_signal_flow(ctx, registry)?;
        registry.seal();

        tracing::debug!(
            nodes = registry.node_names().count(),
            edges = registry.connections().len(),
            "karaoke topology built"
        );
        Ok(graph)
    }
}

fn configure_static_nodes(
    ctx: &mut dyn AudioContext,
    graph: &KaraokeGraph,
    coefficients: &StaticCoefficients,
    impulse_response: Arc<AudioBuffer>,
) -> Result<()> {
    let low_cut = graph.low_cut_filter.handle();
    ctx.set_filter_type(low_cut, FilterType::Highpass)?;
    ctx.set_param_value(low_cut, AudioParam::Frequency, coefficients.low_cut_hz)?;

    let presence = graph.presence_filter.handle();
    ctx.set_filter_type(presence, FilterType::Peaking)?;
    ctx.set_param_value(presence, AudioParam::Frequency, coefficients.presence_hz)?;
    ctx.set_param_value(presence, AudioParam::Q, coefficients.presence_q)?;
    ctx.set_param_value(presence, AudioParam::FilterGain, coefficients.presence_gain_db)?;

    let echo_filter = graph.echo_filter.handle();
    ctx.set_filter_type(echo_filter, FilterType::Lowpass)?;
    ctx.set_param_value(echo_filter, AudioParam::Frequency, coefficients.echo_lowpass_hz)?;

    ctx.set_convolver_buffer(graph.convolver.handle(), impulse_response)?;

    for tap in [graph.mic_analyser, graph.output_analyser] {
        ctx.set_analyser_fft_size(tap.handle(), coefficients.analyser_fft_size)?;
    }
    Ok(())
}
