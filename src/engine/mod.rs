//! Karaoke Engine Module
//!
//! Session orchestration on top of the processing graph:
//! - Mix parameters and ramped parameter control
//! - Impulse response selection for the reverb send
//! - Backing-track transport
//! - Start/stop lifecycle

pub mod ir;
pub mod lifecycle;
pub mod params;
pub mod transport;

pub use ir::{
    generate_synthetic_ir, load_ir_from_bytes, load_ir_from_static_asset, ImpulseResponseProvider,
    IrOrigin, IrSource, SyntheticIrSettings,
};
pub use lifecycle::{DebugTaps, Engine, Session};
pub use params::{ParameterController, ParameterSet, DEFAULT_RAMP_SECS};
pub use transport::{PlaybackCursor, PlaybackTransport, TransportState};
