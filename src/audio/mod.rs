//! Audio Platform Module
//!
//! The native real-time capability the engine orchestrates:
//! - Processing context and node/parameter model
//! - Offline reference context
//! - Microphone capture and bundled assets
//! - Buffers and decoding

pub mod assets;
pub mod buffer;
pub mod capture;
pub mod clock;
pub mod context;
pub mod decode;
pub mod offline;

pub use assets::{AssetSource, DirectoryAssets};
pub use buffer::{linear_to_db, AudioBuffer};
pub use capture::{CaptureConstraints, CaptureDevice, CaptureStream, HardwareTrack, SimulatedMicrophone};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{
    AudioContext, AudioParam, ContextFactory, ContextState, FilterType, NodeHandle, NodeRole,
    MAX_DELAY_TIME_SECS,
};
pub use decode::{decode_audio, decode_audio_native, export_wav, resample};
pub use offline::{OfflineContext, OfflineContextFactory, SourcePlayback};
