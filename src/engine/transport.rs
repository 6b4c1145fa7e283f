//! Playback Transport for the backing track
//!
//! Loops the decoded music buffer into the music gain node with
//! pause/resume offset tracking. A buffer source can only be started
//! once, so every resume creates a fresh source node at the remembered
//! offset.

use std::fmt;
use std::sync::Arc;

use crate::audio::{AudioBuffer, AudioContext, NodeRole};
use crate::error::{KtvError, Result};
use crate::graph::{BufferSourceNode, KaraokeGraph, TypedNode};

/// Transport states of the backing track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Nothing is sounding (default state)
    #[default]
    Paused,
    /// The loop is running
    Playing,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Paused => write!(f, "Paused"),
            TransportState::Playing => write!(f, "Playing"),
        }
    }
}

/// Where the loop is, independent of any source node
///
/// # Example
/// ```
/// use ktv::engine::PlaybackCursor;
///
/// let cursor = PlaybackCursor { start_time_ref: 0.0, paused_at: 7.5 };
/// // 7.5 s into a 3 s loop is 1.5 s into the buffer
/// assert_eq!(cursor.resume_offset(3.0), 1.5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackCursor {
    /// Context time at which a zero-offset start would have happened
    pub start_time_ref: f64,
    /// Seconds of playback elapsed at the last pause
    pub paused_at: f64,
}

impl PlaybackCursor {
    /// Offset into a loop of `duration` seconds to resume from
    pub fn resume_offset(&self, duration: f64) -> f64 {
        if duration > 0.0 {
            self.paused_at.rem_euclid(duration)
        } else {
            0.0
        }
    }
}

/// Owns the backing track and its (at most one) active source node
#[derive(Debug, Clone, Default)]
pub struct PlaybackTransport {
    state: TransportState,
    track: Option<Arc<AudioBuffer>>,
    source: Option<BufferSourceNode>,
    cursor: PlaybackCursor,
}

impl PlaybackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Track Loading
    // ========================================================================

    /// Decode `bytes` as the new backing track
    ///
    /// Stops whatever is playing, rewinds, and leaves the transport paused.
    /// On a decode failure the previous track and state are kept.
    ///
    /// # Errors
    /// * `Decode` - the bytes are not decodable audio
    pub fn load(&mut self, ctx: &mut dyn AudioContext, bytes: &[u8]) -> Result<()> {
        let buffer = ctx.decode_audio_data(bytes)?;
        self.load_buffer(ctx, Arc::new(buffer))
    }

    /// Use an already decoded buffer as the backing track
    pub fn load_buffer(&mut self, ctx: &mut dyn AudioContext, buffer: Arc<AudioBuffer>) -> Result<()> {
        if buffer.is_empty() {
            return Err(KtvError::decode("backing track contains no samples"));
        }
        self.stop_source(ctx)?;
        tracing::debug!(
            duration_secs = buffer.duration_secs(),
            channels = buffer.channels(),
            "backing track loaded"
        );
        self.track = Some(buffer);
        self.cursor = PlaybackCursor::default();
        self.state = TransportState::Paused;
        Ok(())
    }

    // ========================================================================
    // Transport Controls
    // ========================================================================

    /// Play from the remembered offset, or pause and remember where
    ///
    /// # Errors
    /// * `InvalidState` - no track has been loaded
    pub fn toggle(&mut self, ctx: &mut dyn AudioContext, graph: &KaraokeGraph) -> Result<TransportState> {
        match self.state {
            TransportState::Playing => self.pause(ctx)?,
            TransportState::Paused => self.play(ctx, graph)?,
        }
        Ok(self.state)
    }

    /// Stop the active source, zero the cursor, stay paused
    pub fn reset(&mut self, ctx: &mut dyn AudioContext) -> Result<()> {
        self.stop_source(ctx)?;
        self.cursor = PlaybackCursor::default();
        self.state = TransportState::Paused;
        tracing::debug!("transport reset");
        Ok(())
    }

    /// Stop any sounding source without touching the cursor; used at
    /// session teardown
    pub fn halt(&mut self, ctx: &mut dyn AudioContext) -> Result<()> {
        if self.state == TransportState::Playing {
            self.cursor.paused_at = ctx.current_time() - self.cursor.start_time_ref;
        }
        self.stop_source(ctx)?;
        self.state = TransportState::Paused;
        Ok(())
    }

    fn play(&mut self, ctx: &mut dyn AudioContext, graph: &KaraokeGraph) -> Result<()> {
        let track = self
            .track
            .clone()
            .ok_or_else(|| KtvError::invalid_state("no backing track loaded"))?;

        self.stop_source(ctx)?;

        let offset = self.cursor.resume_offset(track.duration_secs());
        let node = BufferSourceNode::from_handle(ctx.create_node(NodeRole::BufferSource)?);
        ctx.connect(node.handle(), graph.music_gain.handle())?;
        ctx.start_buffer_source(node.handle(), track, true, offset)?;

        self.cursor.start_time_ref = ctx.current_time() - offset;
        self.source = Some(node);
        self.state = TransportState::Playing;
        tracing::debug!(offset_secs = offset, "playback started");
        Ok(())
    }

    fn pause(&mut self, ctx: &mut dyn AudioContext) -> Result<()> {
        let elapsed = ctx.current_time() - self.cursor.start_time_ref;
        self.cursor.paused_at = elapsed;
        self.stop_source(ctx)?;
        self.state = TransportState::Paused;
        tracing::debug!(paused_at = elapsed, "playback paused");
        Ok(())
    }

    fn stop_source(&mut self, ctx: &mut dyn AudioContext) -> Result<()> {
        if let Some(node) = self.source.take() {
            ctx.stop_source(node.handle())?;
            ctx.disconnect(node.handle())?;
        }
        Ok(())
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn track(&self) -> Option<&Arc<AudioBuffer>> {
        self.track.as_ref()
    }

    /// The currently sounding source node, if any
    pub fn active_source(&self) -> Option<BufferSourceNode> {
        self.source
    }

    /// Offset within the loop right now, seconds
    pub fn position(&self, ctx: &dyn AudioContext) -> f64 {
        let Some(track) = self.track.as_ref() else {
            return 0.0;
        };
        let duration = track.duration_secs();
        match self.state {
            TransportState::Playing => {
                let elapsed = ctx.current_time() - self.cursor.start_time_ref;
                if duration > 0.0 {
                    elapsed.rem_euclid(duration)
                } else {
                    0.0
                }
            }
            TransportState::Paused => self.cursor.resume_offset(duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        CaptureConstraints, CaptureDevice, ManualClock, OfflineContext, SimulatedMicrophone,
    };
    use crate::graph::{NodeRegistry, TopologyBuilder};
    use approx::assert_relative_eq;

    fn running_graph() -> (OfflineContext, KaraokeGraph, ManualClock) {
        let clock = ManualClock::new();
        let mut ctx = OfflineContext::new(48000, Arc::new(clock.clone()));
        let stream = SimulatedMicrophone::granted()
            .request(&CaptureConstraints::default())
            .unwrap();
        let mut registry = NodeRegistry::new();
        let graph = TopologyBuilder::new(&mut ctx, &mut registry)
            .build(stream, Arc::new(AudioBuffer::silent(2, 480, 48000)))
            .unwrap();
        (ctx, graph, clock)
    }

    fn three_second_track() -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::silent(2, 3 * 48000, 48000))
    }

    // ========================================================================
    // Default State Tests
    // ========================================================================

    #[test]
    fn test_default_state_is_paused() {
        let transport = PlaybackTransport::new();
        assert_eq!(transport.state(), TransportState::Paused);
        assert!(transport.track().is_none());
        assert_eq!(transport.cursor(), PlaybackCursor::default());
    }

    #[test]
    fn test_transport_state_display() {
        assert_eq!(format!("{}", TransportState::Paused), "Paused");
        assert_eq!(format!("{}", TransportState::Playing), "Playing");
    }

    // ========================================================================
    // Toggle Tests
    // ========================================================================

    #[test]
    fn test_toggle_without_track_is_invalid_state() {
        let (mut ctx, graph, _clock) = running_graph();
        let mut transport = PlaybackTransport::new();

        let err = transport.toggle(&mut ctx, &graph).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
        assert_eq!(transport.state(), TransportState::Paused);
    }

    #[test]
    fn test_play_then_pause_records_elapsed() {
        let (mut ctx, graph, clock) = running_graph();
        let mut transport = PlaybackTransport::new();
        transport.load_buffer(&mut ctx, three_second_track()).unwrap();

        assert_eq!(transport.toggle(&mut ctx, &graph).unwrap(), TransportState::Playing);
        clock.advance(1.0);
        assert_eq!(transport.toggle(&mut ctx, &graph).unwrap(), TransportState::Paused);

        assert_relative_eq!(transport.cursor().paused_at, 1.0, epsilon = 1e-9);
        assert_eq!(ctx.playing_sources(), 0);
    }

    #[test]
    fn test_source_feeds_music_gain() {
        let (mut ctx, graph, _clock) = running_graph();
        let mut transport = PlaybackTransport::new();
        transport.load_buffer(&mut ctx, three_second_track()).unwrap();
        transport.toggle(&mut ctx, &graph).unwrap();

        let source = transport.active_source().unwrap().handle();
        assert!(ctx.edges().contains(&(source, graph.music_gain.handle())));
        let playback = ctx.playback(source).unwrap();
        assert!(playback.looping);
        assert_eq!(playback.offset, 0.0);
    }

    #[test]
    fn test_resume_wraps_around_loop() {
        let (mut ctx, graph, clock) = running_graph();
        let mut transport = PlaybackTransport::new();
        transport.load_buffer(&mut ctx, three_second_track()).unwrap();

        transport.toggle(&mut ctx, &graph).unwrap();
        clock.advance(7.5);
        transport.toggle(&mut ctx, &graph).unwrap();
        transport.toggle(&mut ctx, &graph).unwrap();

        let source = transport.active_source().unwrap().handle();
        assert_relative_eq!(ctx.playback(source).unwrap().offset, 1.5, epsilon = 1e-9);
        assert_relative_eq!(transport.position(&ctx), 1.5, epsilon = 1e-9);

        clock.advance(2.0);
        assert_relative_eq!(transport.position(&ctx), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_at_most_one_source_sounds() {
        let (mut ctx, graph, clock) = running_graph();
        let mut transport = PlaybackTransport::new();
        transport.load_buffer(&mut ctx, three_second_track()).unwrap();

        for _ in 0..5 {
            transport.toggle(&mut ctx, &graph).unwrap();
            clock.advance(0.4);
            assert!(ctx.playing_sources() <= 1);
        }
        assert_eq!(ctx.playing_sources(), 1);
    }

    // ========================================================================
    // Reset / Load Tests
    // ========================================================================

    #[test]
    fn test_reset_rewinds_and_stops() {
        let (mut ctx, graph, clock) = running_graph();
        let mut transport = PlaybackTransport::new();
        transport.load_buffer(&mut ctx, three_second_track()).unwrap();
        transport.toggle(&mut ctx, &graph).unwrap();
        clock.advance(1.2);

        transport.reset(&mut ctx).unwrap();
        assert_eq!(transport.state(), TransportState::Paused);
        assert_eq!(transport.cursor(), PlaybackCursor::default());
        assert_eq!(ctx.playing_sources(), 0);
        assert!(transport.active_source().is_none());
    }

    #[test]
    fn test_loading_a_track_while_playing_stops_it() {
        let (mut ctx, graph, clock) = running_graph();
        let mut transport = PlaybackTransport::new();
        transport.load_buffer(&mut ctx, three_second_track()).unwrap();
        transport.toggle(&mut ctx, &graph).unwrap();
        clock.advance(2.0);

        transport
            .load_buffer(&mut ctx, Arc::new(AudioBuffer::silent(1, 48000, 48000)))
            .unwrap();
        assert_eq!(transport.state(), TransportState::Paused);
        assert_eq!(transport.cursor().paused_at, 0.0);
        assert_eq!(ctx.playing_sources(), 0);
    }

    #[test]
    fn test_bad_bytes_keep_previous_track() {
        let (mut ctx, _graph, _clock) = running_graph();
        let mut transport = PlaybackTransport::new();
        let track = three_second_track();
        transport.load_buffer(&mut ctx, Arc::clone(&track)).unwrap();

        let err = transport.load(&mut ctx, b"not audio at all").unwrap_err();
        assert_eq!(err.error_code(), "DECODE_ERROR");
        assert!(Arc::ptr_eq(transport.track().unwrap(), &track));
    }

    #[test]
    fn test_halt_keeps_cursor() {
        let (mut ctx, graph, clock) = running_graph();
        let mut transport = PlaybackTransport::new();
        transport.load_buffer(&mut ctx, three_second_track()).unwrap();
        transport.toggle(&mut ctx, &graph).unwrap();
        clock.advance(0.75);

        transport.halt(&mut ctx).unwrap();
        assert_eq!(transport.state(), TransportState::Paused);
        assert_relative_eq!(transport.cursor().paused_at, 0.75, epsilon = 1e-9);
        assert_eq!(ctx.playing_sources(), 0);
    }

    #[test]
    fn test_resume_offset_handles_empty_duration() {
        let cursor = PlaybackCursor {
            start_time_ref: 0.0,
            paused_at: 4.0,
        };
        assert_eq!(cursor.resume_offset(0.0), 0.0);
        assert_eq!(cursor.resume_offset(3.0), 1.0);
    }
}
