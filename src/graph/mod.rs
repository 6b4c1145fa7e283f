//! Processing Graph Module
//!
//! Named, typed view over the nodes a session creates in its context,
//! and the fixed karaoke topology built from them.

pub mod node;
pub mod registry;
pub mod topology;

pub use node::{
    AnalyserNode, BiquadFilterNode, BufferSourceNode, CompressorNode, ConvolverNode, DelayNode,
    DestinationNode, GainNode, StreamSourceNode, TypedNode,
};
pub use registry::{Connection, NodeRegistry, TopologySnapshot};
pub use topology::{fixed_edges, names, KaraokeGraph, StaticCoefficients, TopologyBuilder};
