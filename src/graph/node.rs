//! Typed node handles
//!
//! Each processing role gets its own handle type so that a gain can never be
//! passed where a compressor is expected. The registry checks the role once,
//! when a name is resolved to a typed handle.

use crate::audio::{NodeHandle, NodeRole};

/// A node handle whose role is known at compile time
pub trait TypedNode: Copy + std::fmt::Debug {
    /// Role every node of this type has
    const ROLE: NodeRole;

    /// Wrap a raw handle; the caller has already checked the role
    fn from_handle(handle: NodeHandle) -> Self;

    /// The underlying context handle
    fn handle(&self) -> NodeHandle;
}

macro_rules! typed_node {
    ($(#[$meta:meta])* $name:ident => $role:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(NodeHandle);

        impl TypedNode for $name {
            const ROLE: NodeRole = $role;

            fn from_handle(handle: NodeHandle) -> Self {
                Self(handle)
            }

            fn handle(&self) -> NodeHandle {
                self.0
            }
        }
    };
}

typed_node!(
    /// Linear level control
    GainNode => NodeRole::Gain
);
typed_node!(
    /// Delay line (up to one second)
    DelayNode => NodeRole::Delay
);
typed_node!(
    /// Second-order filter
    BiquadFilterNode => NodeRole::BiquadFilter
);
typed_node!(
    /// Master bus compressor; also does the ducking
    CompressorNode => NodeRole::DynamicsCompressor
);
typed_node!(ConvolverNode => NodeRole::Convolver);
typed_node!(
    /// Read-only frequency-domain tap
    AnalyserNode => NodeRole::Analyser
);
typed_node!(
    /// Live microphone input
    StreamSourceNode => NodeRole::StreamSource
);
typed_node!(
    /// One-shot player of a decoded buffer
    BufferSourceNode => NodeRole::BufferSource
);
typed_node!(DestinationNode => NodeRole::Destination);
