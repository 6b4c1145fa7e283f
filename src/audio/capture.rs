//! Microphone capture
//!
//! A [`CaptureDevice`] grants a [`CaptureStream`] of hardware tracks. Tracks
//! hold the physical device until they are explicitly stopped; dropping a
//! stream does not release them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{KtvError, Result};

/// Constraints passed with every capture request
///
/// Automatic gain control stays off: the master compressor is the only
/// thing allowed to manage vocal level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    /// Ideal sample rate in Hz
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub noise_suppression: bool,
    pub channel_count: u16,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            echo_cancellation: true,
            auto_gain_control: false,
            noise_suppression: true,
            channel_count: 1,
        }
    }
}

/// One hardware input track
pub trait HardwareTrack: Send {
    /// Device label, for logs
    fn label(&self) -> &str;

    /// Release the device. Safe to call on an already stopped track.
    fn stop(&mut self);

    /// Whether the track still holds the device
    fn is_live(&self) -> bool;
}

/// A granted capture: one or more live hardware tracks
pub struct CaptureStream {
    id: String,
    settings: CaptureConstraints,
    tracks: Vec<Box<dyn HardwareTrack>>,
}

impl CaptureStream {
    pub fn new(
        id: impl Into<String>,
        settings: CaptureConstraints,
        tracks: Vec<Box<dyn HardwareTrack>>,
    ) -> Self {
        Self {
            id: id.into(),
            settings,
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Settings the device actually applied
    pub fn settings(&self) -> &CaptureConstraints {
        &self.settings
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Stop every track; idempotent
    pub fn stop_all_tracks(&mut self) {
        for track in &mut self.tracks {
            if track.is_live() {
                tracing::debug!(stream = %self.id, track = track.label(), "stopping capture track");
            }
            track.stop();
        }
    }
}

impl std::fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStream")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("tracks", &self.tracks.len())
            .field("live", &self.live_track_count())
            .finish()
    }
}

/// Source of microphone streams (the platform's permission prompt lives
/// behind this)
pub trait CaptureDevice: Send {
    /// Ask for a capture stream
    ///
    /// # Errors
    /// * `PermissionDenied` - the user or platform refused access
    fn request(&mut self, constraints: &CaptureConstraints) -> Result<CaptureStream>;
}

// ============================================================================
// Simulated microphone
// ============================================================================

/// In-process microphone used by the offline backend and tests
///
/// Clones share state, so a caller can keep a handle after boxing one into
/// the engine and check how many tracks are still held.
#[derive(Debug, Clone)]
pub struct SimulatedMicrophone {
    granted: Arc<AtomicBool>,
    live_tracks: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    last_constraints: Arc<Mutex<Option<CaptureConstraints>>>,
}

impl SimulatedMicrophone {
    /// A microphone whose permission prompt is accepted
    pub fn granted() -> Self {
        Self::with_permission(true)
    }

    /// A microphone whose permission prompt is refused
    pub fn denied() -> Self {
        Self::with_permission(false)
    }

    fn with_permission(granted: bool) -> Self {
        Self {
            granted: Arc::new(AtomicBool::new(granted)),
            live_tracks: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
            last_constraints: Arc::new(Mutex::new(None)),
        }
    }

    /// Change the answer to future permission prompts
    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    /// Tracks handed out and not yet stopped
    pub fn live_tracks(&self) -> usize {
        self.live_tracks.load(Ordering::SeqCst)
    }

    /// Number of capture requests seen so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Constraints from the most recent request
    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        self.last_constraints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CaptureDevice for SimulatedMicrophone {
    fn request(&mut self, constraints: &CaptureConstraints) -> Result<CaptureStream> {
        let request_no = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .last_constraints
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(constraints.clone());

        if !self.granted.load(Ordering::SeqCst) {
            return Err(KtvError::PermissionDenied {
                reason: "microphone permission was refused".to_string(),
            });
        }

        let tracks: Vec<Box<dyn HardwareTrack>> = (0..constraints.channel_count.max(1))
            .map(|ch| {
                self.live_tracks.fetch_add(1, Ordering::SeqCst);
                Box::new(SimulatedTrack {
                    label: format!("simulated-mic-{}", ch),
                    live: true,
                    counter: Arc::clone(&self.live_tracks),
                }) as Box<dyn HardwareTrack>
            })
            .collect();

        Ok(CaptureStream::new(
            format!("simulated-capture-{}", request_no),
            constraints.clone(),
            tracks,
        ))
    }
}

struct SimulatedTrack {
    label: String,
    live: bool,
    counter: Arc<AtomicUsize>,
}

impl HardwareTrack for SimulatedTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&mut self) {
        if self.live {
            self.live = false;
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }
}
