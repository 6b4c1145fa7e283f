//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{ensure, Context};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::audio::{
    export_wav, AudioParam, DirectoryAssets, ManualClock, OfflineContextFactory,
    SimulatedMicrophone,
};
use crate::config::EngineConfig;
use crate::engine::{generate_synthetic_ir, Engine, ParameterSet};
use crate::graph::names;

/// Load the config file if one was given, otherwise the defaults
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Time source for a CLI session
enum SessionClock {
    Simulated(ManualClock),
    Wall,
}

impl SessionClock {
    fn contexts(&self) -> OfflineContextFactory {
        match self {
            SessionClock::Simulated(clock) => OfflineContextFactory::new(Arc::new(clock.clone())),
            SessionClock::Wall => OfflineContextFactory::system(),
        }
    }

    fn wait(&self, secs: f64) {
        match self {
            SessionClock::Simulated(clock) => clock.advance(secs),
            SessionClock::Wall => thread::sleep(Duration::from_secs_f64(secs)),
        }
    }
}

fn offline_engine(config: EngineConfig, clock: &SessionClock) -> anyhow::Result<Engine> {
    let assets = DirectoryAssets::new(config.asset_root.clone());
    let engine = Engine::new(
        config,
        clock.contexts(),
        SimulatedMicrophone::granted(),
        assets,
    )?;
    Ok(engine)
}

/// Start a session and print the node and edge sets.
pub fn topology(config: EngineConfig) -> anyhow::Result<()> {
    let clock = SessionClock::Simulated(ManualClock::new());
    let mut engine = offline_engine(config, &clock)?;
    engine.start()?;

    let snapshot = engine
        .topology()
        .context("engine reported running without a session")?;

    println!("Nodes ({}):", snapshot.nodes.len());
    for node in &snapshot.nodes {
        println!("  {}", node);
    }
    println!("Connections ({}):", snapshot.edges.len());
    for (source, target) in &snapshot.edges {
        println!("  {} -> {}", source, target);
    }
    if let Some(origin) = engine.ir_origin() {
        println!("Impulse response: {}", origin);
    }

    engine.stop()?;
    Ok(())
}

/// Write a synthetic impulse response.
pub fn ir(
    config: &EngineConfig,
    out: &Path,
    duration: f64,
    decay: f64,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let buffer = generate_synthetic_ir(config.sample_rate, duration, decay, &mut rng)?;
    export_wav(&buffer, out).with_context(|| format!("failed to write {}", out.display()))?;

    info!(path = %out.display(), frames = buffer.len(), "impulse response written");
    println!(
        "Wrote {} ({} ch, {:.2} s, peak {:.1} dBFS)",
        out.display(),
        buffer.channels(),
        buffer.duration_secs(),
        buffer.peak_db()
    );
    Ok(())
}

/// Start karaoke, upload a track, play, pause, stop karaoke.
pub fn session(
    config: EngineConfig,
    music: &Path,
    play_secs: f64,
    params: Option<&Path>,
    realtime: bool,
) -> anyhow::Result<()> {
    ensure!(
        play_secs.is_finite() && play_secs >= 0.0,
        "play time must be a non-negative number of seconds"
    );

    let bytes = std::fs::read(music).with_context(|| format!("failed to read {}", music.display()))?;
    let parameters = match params {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Some(serde_json::from_str::<ParameterSet>(&content)?)
        }
        None => None,
    };

    let clock = if realtime {
        SessionClock::Wall
    } else {
        SessionClock::Simulated(ManualClock::new())
    };
    let ramp = config.ramp_time_secs;
    let mut engine = offline_engine(config, &clock)?;

    engine.start()?;
    println!("Session {} started", engine.session_id().unwrap_or_default());
    if let Some(origin) = engine.ir_origin() {
        println!("Impulse response: {}", origin);
    }

    if let Some(parameters) = parameters {
        engine.apply_parameters(parameters)?;
        clock.wait(ramp * 10.0);
        println!(
            "Compressor: threshold {:.1} dB, ratio {:.1}",
            engine.live_value(names::COMPRESSOR, AudioParam::Threshold)?,
            engine.live_value(names::COMPRESSOR, AudioParam::Ratio)?
        );
    }

    engine
        .load_track(&bytes)
        .map_err(|e| anyhow::anyhow!(e.friendly_message()))?;
    println!("Track loaded: {}", music.display());

    let state = engine.toggle()?;
    println!("Transport: {}", state);
    clock.wait(play_secs);
    let state = engine.toggle()?;
    println!(
        "Transport: {} at {:.3} s",
        state,
        engine.playback_position()
    );

    engine.stop()?;
    println!("Session stopped");
    Ok(())
}
