//! KTV - Karaoke Mixing Engine
//!
//! Mixes a live microphone with a looped backing track, adding echo,
//! convolution reverb and compressor-driven ducking, with every mix value
//! ramped smoothly while the session runs.
//!
//! # Architecture
//!
//! The engine is an orchestration layer over a real-time processing context:
//! - `audio`: the context, capture and asset abstractions, plus an offline
//!   reference context
//! - `graph`: named, typed nodes and the fixed karaoke topology
//! - `engine`: parameters, impulse responses, transport and the lifecycle
//!   manager that collaborators drive

pub mod audio;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;

pub use config::EngineConfig;
pub use engine::{Engine, ParameterSet, TransportState};
pub use error::{KtvError, Result};
