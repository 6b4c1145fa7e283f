//! Engine Lifecycle Manager
//!
//! The only entry point collaborators call. `start()` acquires the
//! microphone, creates a processing context, builds and seals the topology
//! and applies the remembered mix; `stop()` tears all of it down as a unit.
//! A failure anywhere in `start()` releases what was acquired so far and
//! leaves the engine stopped.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use crate::audio::{
    decode_audio_native, AssetSource, AudioBuffer, AudioContext, AudioParam, CaptureDevice,
    ContextFactory,
};
use crate::config::EngineConfig;
use crate::engine::ir::{ImpulseResponseProvider, IrOrigin};
use crate::engine::params::{ParameterController, ParameterSet};
use crate::engine::transport::{PlaybackTransport, TransportState};
use crate::error::{KtvError, Result};
use crate::graph::{
    AnalyserNode, KaraokeGraph, NodeRegistry, StaticCoefficients, TopologyBuilder,
    TopologySnapshot,
};

/// The two read-only analysis taps handed to a visualizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugTaps {
    /// Raw microphone, before any processing
    pub mic: AnalyserNode,
    /// Master bus, after the compressor
    pub master: AnalyserNode,
}

/// Everything that lives exactly as long as one start/stop cycle
pub struct Session {
    id: Uuid,
    context: Box<dyn AudioContext>,
    registry: NodeRegistry,
    graph: KaraokeGraph,
    transport: PlaybackTransport,
    ir_origin: IrOrigin,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn graph(&self) -> &KaraokeGraph {
        &self.graph
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn context(&self) -> &dyn AudioContext {
        self.context.as_ref()
    }

    pub fn transport(&self) -> &PlaybackTransport {
        &self.transport
    }

    pub fn ir_origin(&self) -> &IrOrigin {
        &self.ir_origin
    }
}

/// Karaoke mixing engine
pub struct Engine {
    config: EngineConfig,
    contexts: Box<dyn ContextFactory>,
    capture: Box<dyn CaptureDevice>,
    assets: Box<dyn AssetSource>,
    controller: ParameterController,
    parameters: ParameterSet,
    custom_ir: Option<Arc<AudioBuffer>>,
    rng: StdRng,
    session: Option<Session>,
}

impl Engine {
    /// Create a stopped engine
    ///
    /// # Errors
    /// * `InvalidParameter` - the configuration does not validate
    pub fn new(
        config: EngineConfig,
        contexts: impl ContextFactory + 'static,
        capture: impl CaptureDevice + 'static,
        assets: impl AssetSource + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let controller = ParameterController::new(config.ramp_time_secs)?;
        let rng = match config.synthetic_ir.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            parameters: config.initial_parameters,
            config,
            contexts: Box::new(contexts),
            capture: Box::new(capture),
            assets: Box::new(assets),
            controller,
            custom_ir: None,
            rng,
            session: None,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Build a session; a no-op when already running
    ///
    /// # Errors
    /// * `PermissionDenied` - microphone access was refused; nothing is held
    /// * `Backend` - the processing context could not be created
    /// * `GraphReference` - the topology could not be wired
    pub fn start(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            tracing::debug!(session = %session.id, "start ignored, engine already running");
            return Ok(());
        }

        let id = Uuid::new_v4();
        let span = tracing::info_span!("session", id = %id);
        let _enter = span.enter();

        let mut stream = match self.capture.request(&self.config.capture) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "microphone capture refused");
                return Err(e);
            }
        };
        let applied = stream.settings();
        tracing::debug!(
            stream = stream.id(),
            sample_rate = applied.sample_rate,
            echo_cancellation = applied.echo_cancellation,
            noise_suppression = applied.noise_suppression,
            "microphone granted"
        );

        let mut context = match self.contexts.create(self.config.sample_rate) {
            Ok(context) => context,
            Err(e) => {
                stream.stop_all_tracks();
                tracing::error!(error = %e, "could not create processing context");
                return Err(e);
            }
        };

        let (impulse_response, ir_origin) = match self.select_impulse_response(context.as_ref()) {
            Ok(selected) => selected,
            Err(e) => {
                stream.stop_all_tracks();
                close_quietly(context.as_mut());
                return Err(e);
            }
        };

        let mut registry = NodeRegistry::new();
        let coefficients = StaticCoefficients {
            analyser_fft_size: self.config.analyser_fft_size,
            ..StaticCoefficients::default()
        };
        let built = TopologyBuilder::new(context.as_mut(), &mut registry)
            .with_coefficients(coefficients)
            .build(stream, impulse_response)
            .and_then(|graph| {
                self.controller
                    .apply(context.as_mut(), &graph, &self.parameters)
                    .map(|applied| (graph, applied))
            });

        let (graph, applied) = match built {
            Ok(built) => built,
            Err(e) => {
                registry.stop_all();
                close_quietly(context.as_mut());
                tracing::error!(error = %e, "session build failed, engine stays stopped");
                return Err(e);
            }
        };
        self.parameters = applied;

        tracing::info!(
            sample_rate = context.sample_rate(),
            nodes = registry.node_names().count(),
            ir = %ir_origin,
            "karaoke engine started"
        );

        self.session = Some(Session {
            id,
            context,
            registry,
            graph,
            transport: PlaybackTransport::new(),
            ir_origin,
        });
        Ok(())
    }

    /// Tear the session down; a no-op when already stopped
    ///
    /// Music stops first, then the microphone is released, then the context
    /// is closed. The session is discarded even if closing fails.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            tracing::debug!("stop ignored, engine not running");
            return Ok(());
        };
        let span = tracing::info_span!("session", id = %session.id);
        let _enter = span.enter();

        if let Err(e) = session.transport.halt(session.context.as_mut()) {
            tracing::warn!(error = %e, "could not stop backing track");
        }
        session.registry.stop_all();
        let closed = session.context.close();

        tracing::info!("karaoke engine stopped");
        closed
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Where the running session's reverb kernel came from
    pub fn ir_origin(&self) -> Option<&IrOrigin> {
        self.session.as_ref().map(|s| &s.ir_origin)
    }

    /// Node names and edges of the running session
    pub fn topology(&self) -> Option<TopologySnapshot> {
        self.session.as_ref().map(|s| s.registry.snapshot())
    }

    pub fn debug_taps(&self) -> Option<DebugTaps> {
        self.session.as_ref().map(|s| DebugTaps {
            mic: s.graph.mic_analyser,
            master: s.graph.output_analyser,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// The mix that is applied now, or will be on the next start
    pub fn parameters(&self) -> ParameterSet {
        self.parameters
    }

    /// Ramp the mix toward `set` with the configured ramp time
    pub fn apply_parameters(&mut self, set: ParameterSet) -> Result<()> {
        let ramp = self.controller.ramp_secs();
        self.apply_parameters_with_ramp(set, ramp)
    }

    /// Ramp the mix toward `set` over `ramp_secs`
    ///
    /// While stopped only the remembered set changes.
    ///
    /// # Errors
    /// * `InvalidParameter` - `ramp_secs` is negative or NaN
    pub fn apply_parameters_with_ramp(&mut self, set: ParameterSet, ramp_secs: f64) -> Result<()> {
        crate::engine::params::validate_ramp(ramp_secs)?;
        match self.session.as_mut() {
            Some(session) => {
                self.parameters = self.controller.apply_with_ramp(
                    session.context.as_mut(),
                    &session.graph,
                    &set,
                    ramp_secs,
                )?;
            }
            None => {
                tracing::debug!("engine stopped, parameters remembered for next start");
                self.parameters = set.clamped();
            }
        }
        Ok(())
    }

    /// Current (possibly still ramping) value of a node parameter
    ///
    /// # Errors
    /// * `InvalidState` - the engine is stopped
    /// * `GraphReference` - no node is registered under `name`
    pub fn live_value(&self, name: &str, param: AudioParam) -> Result<f32> {
        let session = self.running()?;
        let (_, handle) = session.registry.lookup(name)?;
        session.context.param_value(handle, param)
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Decode and cue a backing track; ignored while stopped
    pub fn load_track(&mut self, bytes: &[u8]) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.transport.load(session.context.as_mut(), bytes),
            None => {
                tracing::warn!("engine stopped, backing track not loaded");
                Ok(())
            }
        }
    }

    /// Play or pause the backing track
    ///
    /// # Errors
    /// * `InvalidState` - running with no track loaded
    pub fn toggle(&mut self) -> Result<TransportState> {
        match self.session.as_mut() {
            Some(session) => session
                .transport
                .toggle(session.context.as_mut(), &session.graph),
            None => {
                tracing::debug!("engine stopped, toggle ignored");
                Ok(TransportState::Paused)
            }
        }
    }

    /// Stop the backing track and rewind it
    pub fn reset_track(&mut self) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.transport.reset(session.context.as_mut()),
            None => {
                tracing::debug!("engine stopped, reset ignored");
                Ok(())
            }
        }
    }

    pub fn transport_state(&self) -> TransportState {
        self.session
            .as_ref()
            .map(|s| s.transport.state())
            .unwrap_or_default()
    }

    /// Offset within the backing-track loop, seconds
    pub fn playback_position(&self) -> f64 {
        self.session
            .as_ref()
            .map(|s| s.transport.position(s.context.as_ref()))
            .unwrap_or(0.0)
    }

    // ========================================================================
    // Impulse Response
    // ========================================================================

    /// Use an uploaded IR for this and every later session
    ///
    /// The bytes are decoded before anything changes, so a malformed upload
    /// keeps the current reverb. The IR is kept at its own sample rate and
    /// resampled for each session's context. The convolver kernel is fixed
    /// per session: a running engine is rebuilt, keeping its backing track
    /// cued. If the rebuild fails the previous IR is restored.
    ///
    /// # Errors
    /// * `Decode` - the bytes are not decodable audio
    /// * any error from restarting a running session
    pub fn replace_impulse_response(&mut self, bytes: &[u8]) -> Result<()> {
        let buffer = decode_audio_native(bytes)?;
        if buffer.is_empty() {
            return Err(KtvError::decode("impulse response contains no samples"));
        }
        tracing::info!(
            channels = buffer.channels(),
            sample_rate = buffer.sample_rate(),
            duration_secs = buffer.duration_secs(),
            "custom impulse response accepted"
        );
        let previous = self.custom_ir.replace(Arc::new(buffer));
        self.rebuild_if_running().map_err(|e| {
            self.custom_ir = previous;
            e
        })
    }

    /// Go back to the configured IR source
    ///
    /// If rebuilding a running session fails, the custom IR stays selected.
    pub fn clear_custom_impulse_response(&mut self) -> Result<()> {
        let Some(previous) = self.custom_ir.take() else {
            return Ok(());
        };
        self.rebuild_if_running().map_err(|e| {
            self.custom_ir = Some(previous);
            e
        })
    }

    fn rebuild_if_running(&mut self) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let track = session.transport.track().cloned();

        self.stop()?;
        self.start()?;

        if let (Some(track), Some(session)) = (track, self.session.as_mut()) {
            session
                .transport
                .load_buffer(session.context.as_mut(), track)?;
        }
        Ok(())
    }

    fn select_impulse_response(
        &mut self,
        context: &dyn AudioContext,
    ) -> Result<(Arc<AudioBuffer>, IrOrigin)> {
        let provider = ImpulseResponseProvider::new(self.assets.as_ref(), self.config.synthetic_ir);
        provider.select(context, &self.config.ir, self.custom_ir.as_ref(), &mut self.rng)
    }

    fn running(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| KtvError::invalid_state("karaoke engine is not running"))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "engine teardown on drop failed");
        }
    }
}

fn close_quietly(context: &mut dyn AudioContext) {
    if let Err(e) = context.close() {
        tracing::warn!(error = %e, "could not close processing context");
    }
}
