//! CLI Module
//!
//! Thin command surface over the engine, driven against the offline
//! context and a simulated microphone.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// KTV - karaoke mixing engine
#[derive(Parser, Debug)]
#[command(name = "ktv-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a session and print its nodes and connections
    #[command(name = "topology")]
    Topology,

    /// Write a synthetic impulse response as WAV
    #[command(name = "ir")]
    Ir {
        /// Output WAV file
        #[arg(short, long)]
        out: PathBuf,

        /// Tail length in seconds
        #[arg(long, default_value_t = 2.0)]
        duration: f64,

        /// Decay time constant in seconds
        #[arg(long, default_value_t = 0.5)]
        decay: f64,

        /// RNG seed for a reproducible tail
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run start, upload, play, pause and stop against a backing track
    #[command(name = "session")]
    Session {
        /// Backing track (WAV or MP3)
        #[arg(short, long)]
        music: PathBuf,

        /// Seconds of playback before pausing
        #[arg(long, default_value_t = 1.0)]
        play_secs: f64,

        /// Mix parameters to apply after starting (JSON)
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Wait on the wall clock instead of a simulated one
        #[arg(long)]
        realtime: bool,
    },
}
