//! Engine Integration Tests
//!
//! End-to-end tests of the karaoke engine against the offline context,
//! a simulated microphone and a temporary asset directory.

use std::sync::Arc;

use approx::assert_relative_eq;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::{tempdir, TempDir};
use test_case::test_case;

use ktv::audio::{
    export_wav, AudioBuffer, AudioContext, AudioParam, ContextFactory, DirectoryAssets,
    ManualClock, OfflineContext, OfflineContextFactory, SimulatedMicrophone,
};
use ktv::engine::{generate_synthetic_ir, load_ir_from_bytes, IrOrigin, PlaybackCursor};
use ktv::graph::{fixed_edges, names};
use ktv::{Engine, EngineConfig, ParameterSet, TransportState};

/// Engine wired to a fake clock, a simulated microphone and a temp asset root
struct Rig {
    engine: Engine,
    clock: ManualClock,
    mic: SimulatedMicrophone,
    assets: TempDir,
}

fn rig_with(mic: SimulatedMicrophone, with_recorded_ir: bool) -> Rig {
    let clock = ManualClock::new();
    let assets = tempdir().unwrap();
    if with_recorded_ir {
        let ir = AudioBuffer::silent(2, 24000, 48000);
        export_wav(&ir, &assets.path().join("plate01.wav")).unwrap();
    }

    let mut config = EngineConfig::default();
    config.synthetic_ir.seed = Some(42);
    let engine = Engine::new(
        config,
        OfflineContextFactory::new(Arc::new(clock.clone())),
        mic.clone(),
        DirectoryAssets::new(assets.path()),
    )
    .unwrap();

    Rig {
        engine,
        clock,
        mic,
        assets,
    }
}

fn rig() -> Rig {
    rig_with(SimulatedMicrophone::granted(), true)
}

/// WAV bytes of a stereo sine of the given length
fn track_bytes(dir: &TempDir, seconds: f64, sample_rate: u32) -> Vec<u8> {
    let frames = (seconds * sample_rate as f64).round() as usize;
    let tone: Vec<f32> = (0..frames)
        .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / sample_rate as f64).sin() as f32 * 0.5)
        .collect();
    let buffer = AudioBuffer::from_channels(vec![tone.clone(), tone], sample_rate).unwrap();

    let path = dir.path().join(format!("track-{}-{}.wav", seconds, sample_rate));
    export_wav(&buffer, &path).unwrap();
    std::fs::read(path).unwrap()
}

// === Lifecycle Scenarios ===

#[test]
fn test_start_with_permission_and_recorded_ir() {
    let mut rig = rig();
    rig.engine.start().unwrap();

    assert!(rig.engine.is_running());
    let taps = rig.engine.debug_taps().expect("taps while running");
    assert_ne!(taps.mic, taps.master);
    assert_eq!(
        rig.engine.ir_origin(),
        Some(&IrOrigin::Recorded {
            path: "plate01.wav".to_string()
        })
    );
    assert_eq!(rig.mic.live_tracks(), 1);
}

#[test]
fn test_start_with_denied_permission() {
    let mut rig = rig_with(SimulatedMicrophone::denied(), true);

    let err = rig.engine.start().unwrap_err();
    assert_eq!(err.error_code(), "PERMISSION_DENIED");
    assert!(err.friendly_message().contains("allow microphone access"));

    assert!(!rig.engine.is_running());
    assert!(rig.engine.topology().is_none());
    assert!(rig.engine.debug_taps().is_none());
    assert_eq!(rig.mic.live_tracks(), 0);
}

#[test]
fn test_permission_granted_on_retry() {
    let mut rig = rig_with(SimulatedMicrophone::denied(), true);
    assert!(rig.engine.start().is_err());

    rig.mic.set_granted(true);
    rig.engine.start().unwrap();
    assert!(rig.engine.is_running());
}

#[test]
fn test_capture_constraints_requested() {
    let mut rig = rig();
    rig.engine.start().unwrap();

    let constraints = rig.mic.last_constraints().unwrap();
    assert_eq!(constraints.sample_rate, 48000);
    assert!(constraints.echo_cancellation);
    assert!(!constraints.auto_gain_control);
    assert!(constraints.noise_suppression);
    assert_eq!(constraints.channel_count, 1);
}

#[test]
fn test_stop_twice_is_a_no_op() {
    let mut rig = rig();
    rig.engine.start().unwrap();

    rig.engine.stop().unwrap();
    rig.engine.stop().unwrap();

    assert!(!rig.engine.is_running());
    assert_eq!(rig.mic.live_tracks(), 0);
}

#[test]
fn test_restart_rebuilds_identical_topology() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    let first = rig.engine.topology().unwrap();

    rig.engine.stop().unwrap();
    rig.engine.start().unwrap();
    let second = rig.engine.topology().unwrap();

    assert_eq!(first, second);
    assert_eq!(rig.mic.request_count(), 2);
    assert_eq!(rig.mic.live_tracks(), 1);
}

#[test]
fn test_every_fixed_edge_resolves_to_registered_nodes() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    let snapshot = rig.engine.topology().unwrap();
    let session = rig.engine.session().unwrap();

    for (source, target) in fixed_edges() {
        assert!(session.registry().lookup(source).is_ok(), "{} not registered", source);
        assert!(session.registry().lookup(target).is_ok(), "{} not registered", target);
        assert!(
            snapshot
                .edges
                .contains(&(source.to_string(), target.to_string())),
            "missing edge {} -> {}",
            source,
            target
        );
    }
    assert_eq!(snapshot.edges.len(), fixed_edges().len());
    assert!(snapshot
        .edges
        .contains(&(names::ECHO_FILTER.to_string(), names::ECHO_DELAY.to_string())));
}

// === Parameters ===

#[test]
fn test_compressor_values_approach_targets() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    rig.clock.advance(1.0);

    let set = ParameterSet {
        threshold: -40.0,
        ratio: 14.0,
        ..Default::default()
    };
    rig.engine.apply_parameters(set).unwrap();
    rig.clock.advance(rig.engine.config().ramp_time_secs * 5.0);

    let threshold = rig
        .engine
        .live_value(names::COMPRESSOR, AudioParam::Threshold)
        .unwrap();
    let ratio = rig
        .engine
        .live_value(names::COMPRESSOR, AudioParam::Ratio)
        .unwrap();
    assert!((threshold - -40.0).abs() < 0.1, "threshold {}", threshold);
    assert!((ratio - 14.0).abs() < 0.05, "ratio {}", ratio);
}

#[test]
fn test_ramp_is_smooth_not_a_step() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    rig.clock.advance(1.0);

    rig.engine
        .apply_parameters(ParameterSet {
            mic: 0.2,
            ..Default::default()
        })
        .unwrap();
    rig.clock.advance(0.01);

    let mic = rig.engine.live_value(names::MIC_GAIN, AudioParam::Gain).unwrap();
    assert!(mic < 0.8 && mic > 0.2, "mic gain jumped to {}", mic);
}

#[test]
fn test_parameters_survive_restart() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    rig.engine
        .apply_parameters(ParameterSet {
            echo: 0.7,
            ..Default::default()
        })
        .unwrap();
    rig.engine.stop().unwrap();

    rig.engine.start().unwrap();
    rig.clock.advance(1.0);
    let echo = rig
        .engine
        .live_value(names::ECHO_FEEDBACK, AudioParam::Gain)
        .unwrap();
    assert_relative_eq!(echo, 0.7, epsilon = 1e-3);
}

fn minimum_set() -> ParameterSet {
    ParameterSet {
        mic: 0.0,
        music: 0.0,
        echo: 0.0,
        reverb: 0.0,
        delay: 0.05,
        threshold: -60.0,
        ratio: 1.0,
        knee: 0.0,
        attack: 0.0,
        release: 0.01,
    }
}

fn maximum_set() -> ParameterSet {
    ParameterSet {
        mic: 1.5,
        music: 1.5,
        echo: 1.5,
        reverb: 1.5,
        delay: 1.0,
        threshold: 0.0,
        ratio: 20.0,
        knee: 40.0,
        attack: 0.1,
        release: 1.0,
    }
}

#[test_case(ParameterSet::default() ; "defaults")]
#[test_case(minimum_set() ; "range minimum")]
#[test_case(maximum_set() ; "range maximum")]
#[test_case(ParameterSet { threshold: -40.0, ratio: 14.0, ..Default::default() } ; "heavy ducking")]
fn test_in_range_sets_apply_while_running(set: ParameterSet) {
    let mut rig = rig();
    rig.engine.start().unwrap();

    rig.engine.apply_parameters(set).unwrap();
    rig.clock.advance(1.0);
    assert_eq!(rig.engine.parameters(), set);

    let delay = rig
        .engine
        .live_value(names::ECHO_DELAY, AudioParam::DelayTime)
        .unwrap();
    assert_relative_eq!(delay, set.delay, epsilon = 1e-3);
}

#[test]
fn test_negative_ramp_rejected() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    let err = rig
        .engine
        .apply_parameters_with_ramp(ParameterSet::default(), -1.0)
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_PARAMETER");
}

// === Transport ===

#[test]
fn test_play_pause_records_elapsed_time() {
    let mut rig = rig();
    let bytes = track_bytes(&rig.assets, 3.0, 48000);
    rig.engine.start().unwrap();
    rig.engine.load_track(&bytes).unwrap();

    assert_eq!(rig.engine.toggle().unwrap(), TransportState::Playing);
    rig.clock.advance(1.0);
    assert_eq!(rig.engine.toggle().unwrap(), TransportState::Paused);

    let cursor = rig.engine.session().unwrap().transport().cursor();
    assert_relative_eq!(cursor.paused_at, 1.0, epsilon = 1e-6);
    assert_relative_eq!(rig.engine.playback_position(), 1.0, epsilon = 1e-6);
}

#[test]
fn test_resume_after_loop_wraps() {
    let mut rig = rig();
    let bytes = track_bytes(&rig.assets, 3.0, 48000);
    rig.engine.start().unwrap();
    rig.engine.load_track(&bytes).unwrap();

    rig.engine.toggle().unwrap();
    rig.clock.advance(7.25);
    rig.engine.toggle().unwrap();
    rig.engine.toggle().unwrap();

    assert_eq!(rig.engine.transport_state(), TransportState::Playing);
    assert_relative_eq!(rig.engine.playback_position(), 1.25, epsilon = 1e-6);

    let expected = PlaybackCursor {
        start_time_ref: 0.0,
        paused_at: 7.25,
    }
    .resume_offset(3.0);
    assert_relative_eq!(expected, 1.25, epsilon = 1e-9);
}

#[test]
fn test_track_decoded_at_context_rate() {
    let mut rig = rig();
    let bytes = track_bytes(&rig.assets, 2.0, 44100);
    rig.engine.start().unwrap();
    rig.engine.load_track(&bytes).unwrap();

    let session = rig.engine.session().unwrap();
    let track = session.transport().track().unwrap();
    assert_eq!(track.sample_rate(), 48000);
    assert!((track.len() as i64 - 96000).abs() <= 1);
}

#[test]
fn test_toggle_without_track_while_running() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    let err = rig.engine.toggle().unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE");
}

#[test]
fn test_reset_rewinds_track() {
    let mut rig = rig();
    let bytes = track_bytes(&rig.assets, 3.0, 48000);
    rig.engine.start().unwrap();
    rig.engine.load_track(&bytes).unwrap();
    rig.engine.toggle().unwrap();
    rig.clock.advance(2.0);

    rig.engine.reset_track().unwrap();
    assert_eq!(rig.engine.transport_state(), TransportState::Paused);
    assert_eq!(rig.engine.playback_position(), 0.0);
}

#[test]
fn test_malformed_track_is_decode_error() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    let err = rig.engine.load_track(b"this is not a song").unwrap_err();
    assert_eq!(err.error_code(), "DECODE_ERROR");
    assert!(err.is_recoverable());
}

#[test]
fn test_stop_while_playing_releases_everything() {
    let mut rig = rig();
    let bytes = track_bytes(&rig.assets, 3.0, 48000);
    rig.engine.start().unwrap();
    rig.engine.load_track(&bytes).unwrap();
    rig.engine.toggle().unwrap();

    rig.engine.stop().unwrap();
    assert!(!rig.engine.is_running());
    assert_eq!(rig.engine.transport_state(), TransportState::Paused);
    assert_eq!(rig.mic.live_tracks(), 0);
}

// === Impulse Response ===

#[test]
fn test_ir_round_trip_length() {
    let dir = tempdir().unwrap();
    let source = AudioBuffer::silent(2, (1.5 * 44100.0) as usize, 44100);
    let path = dir.path().join("hall.wav");
    export_wav(&source, &path).unwrap();
    let bytes = std::fs::read(&path).unwrap();

    let ctx = OfflineContext::new(48000, Arc::new(ManualClock::new()));
    let ir = load_ir_from_bytes(&ctx, &bytes).unwrap();

    assert_eq!(ir.channels(), 2);
    assert!((ir.len() as i64 - 72000).abs() <= 1, "got {} frames", ir.len());
}

#[test]
fn test_synthetic_ir_envelope_over_repeated_draws() {
    let rate = 8000u32;
    let decay = 0.2;
    let window = 400;
    let mut rng = StdRng::seed_from_u64(2024);

    let mut peaks = vec![0.0f32; 8000 / window];
    for _ in 0..20 {
        let ir = generate_synthetic_ir(rate, 1.0, decay, &mut rng).unwrap();
        for channel in ir.samples() {
            for (w, chunk) in channel.chunks(window).enumerate() {
                let peak = chunk.iter().fold(0.0f32, |m, s| m.max(s.abs()));
                peaks[w] = peaks[w].max(peak);
            }
        }
    }

    for (w, peak) in peaks.iter().enumerate() {
        let bound = (-((w * window) as f64) / (rate as f64 * decay)).exp() as f32;
        assert!(*peak <= bound + 1e-6, "window {} peak {} above {}", w, peak, bound);
        // Repeated draws should come close to the envelope
        assert!(*peak >= bound * 0.5, "window {} peak {} far below {}", w, peak, bound);
    }
}

#[test]
fn test_missing_recorded_ir_falls_back() {
    let mut rig = rig_with(SimulatedMicrophone::granted(), false);
    rig.engine.start().unwrap();

    match rig.engine.ir_origin().unwrap() {
        IrOrigin::SyntheticFallback { reason } => assert!(reason.contains("plate01.wav")),
        other => panic!("expected synthetic fallback, got {}", other),
    }
}

#[test]
fn test_custom_ir_rebuilds_running_session() {
    let mut rig = rig();
    let track = track_bytes(&rig.assets, 3.0, 48000);
    let custom = track_bytes(&rig.assets, 0.5, 48000);
    rig.engine.start().unwrap();
    rig.engine.load_track(&track).unwrap();
    let before = rig.engine.session_id().unwrap();

    rig.engine.replace_impulse_response(&custom).unwrap();

    assert!(rig.engine.is_running());
    assert_ne!(rig.engine.session_id().unwrap(), before);
    assert_eq!(rig.engine.ir_origin(), Some(&IrOrigin::Custom));
    assert_eq!(rig.mic.live_tracks(), 1);
    // The backing track stays cued across the rebuild
    assert_eq!(rig.engine.toggle().unwrap(), TransportState::Playing);
}

#[test]
fn test_malformed_custom_ir_keeps_session() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    let before = rig.engine.session_id();

    let err = rig.engine.replace_impulse_response(b"garbage").unwrap_err();
    assert_eq!(err.error_code(), "DECODE_ERROR");
    assert_eq!(rig.engine.session_id(), before);
    assert!(matches!(
        rig.engine.ir_origin(),
        Some(IrOrigin::Recorded { .. })
    ));
}

#[test]
fn test_custom_ir_while_stopped_used_on_next_start() {
    let mut rig = rig();
    let custom = track_bytes(&rig.assets, 0.5, 22050);

    rig.engine.replace_impulse_response(&custom).unwrap();
    assert!(!rig.engine.is_running());

    rig.engine.start().unwrap();
    assert_eq!(rig.engine.ir_origin(), Some(&IrOrigin::Custom));
}

// === Context Backends ===

/// Ignores the requested rate, like a device locked to its own clock
struct FixedRateContexts {
    rate: u32,
    clock: ManualClock,
}

impl ContextFactory for FixedRateContexts {
    fn create(&mut self, _requested: u32) -> ktv::Result<Box<dyn AudioContext>> {
        Ok(Box::new(OfflineContext::new(self.rate, Arc::new(self.clock.clone()))))
    }
}

/// Hands out contexts that are already shut down
struct ClosedContexts {
    clock: ManualClock,
}

impl ContextFactory for ClosedContexts {
    fn create(&mut self, sample_rate: u32) -> ktv::Result<Box<dyn AudioContext>> {
        let mut ctx = OfflineContext::new(sample_rate, Arc::new(self.clock.clone()));
        ctx.close()?;
        Ok(Box::new(ctx))
    }
}

fn engine_with_contexts(
    contexts: impl ContextFactory + 'static,
    mic: &SimulatedMicrophone,
    assets: &TempDir,
) -> Engine {
    Engine::new(
        EngineConfig::default(),
        contexts,
        mic.clone(),
        DirectoryAssets::new(assets.path()),
    )
    .unwrap()
}

#[test]
fn test_custom_ir_follows_session_rate() {
    let mic = SimulatedMicrophone::granted();
    let assets = tempdir().unwrap();
    let clock = ManualClock::new();
    let mut engine = engine_with_contexts(
        FixedRateContexts {
            rate: 44100,
            clock: clock.clone(),
        },
        &mic,
        &assets,
    );

    engine
        .replace_impulse_response(&track_bytes(&assets, 0.5, 48000))
        .unwrap();
    engine.start().unwrap();

    let session = engine.session().unwrap();
    assert_eq!(session.context().sample_rate(), 44100);
    assert_eq!(session.ir_origin(), &IrOrigin::Custom);

    // Uploading while running rebinds at the session rate too
    engine
        .replace_impulse_response(&track_bytes(&assets, 0.25, 22050))
        .unwrap();
    assert!(engine.is_running());
    assert_eq!(engine.ir_origin(), Some(&IrOrigin::Custom));
    assert_eq!(mic.live_tracks(), 1);
}

#[test]
fn test_build_failure_releases_microphone() {
    let mic = SimulatedMicrophone::granted();
    let assets = tempdir().unwrap();
    let mut engine = engine_with_contexts(
        ClosedContexts {
            clock: ManualClock::new(),
        },
        &mic,
        &assets,
    );

    let err = engine.start().unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE");
    assert!(!engine.is_running());
    assert_eq!(mic.request_count(), 1);
    assert_eq!(mic.live_tracks(), 0);
}

#[test]
fn test_failed_rebuild_keeps_previous_ir() {
    let mut rig = rig();
    rig.engine.start().unwrap();
    let custom = track_bytes(&rig.assets, 0.5, 48000);

    rig.mic.set_granted(false);
    let err = rig.engine.replace_impulse_response(&custom).unwrap_err();
    assert_eq!(err.error_code(), "PERMISSION_DENIED");
    assert!(!rig.engine.is_running());
    assert_eq!(rig.mic.live_tracks(), 0);

    rig.mic.set_granted(true);
    rig.engine.start().unwrap();
    assert_eq!(
        rig.engine.ir_origin(),
        Some(&IrOrigin::Recorded {
            path: "plate01.wav".to_string()
        })
    );
}
