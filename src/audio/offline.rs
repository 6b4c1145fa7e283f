//! Offline processing context
//!
//! In-process [`AudioContext`] that keeps the node table, the edge list and
//! every parameter's automation timeline, and evaluates them against a
//! [`Clock`]. It renders no audio; it is the reference backend for the CLI
//! and the test suite.

use std::collections::HashMap;
use std::sync::Arc;

use crate::audio::buffer::AudioBuffer;
use crate::audio::capture::CaptureStream;
use crate::audio::clock::{Clock, SystemClock};
use crate::audio::context::{
    AudioContext, AudioParam, ContextFactory, ContextState, FilterType, NodeHandle, NodeRole,
};
use crate::error::{KtvError, Result};

/// Default analyser FFT size for new analyser nodes
const DEFAULT_FFT_SIZE: usize = 2048;

// ============================================================================
// Parameter automation
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Ramp {
    from: f32,
    target: f32,
    start: f64,
    time_constant: f64,
}

/// Automation state of one parameter
#[derive(Debug, Clone, Copy)]
struct ParamTimeline {
    value: f32,
    ramp: Option<Ramp>,
    range: (f32, f32),
}

impl ParamTimeline {
    fn new(param: AudioParam) -> Self {
        Self {
            value: param.default_value(),
            ramp: None,
            range: param.nominal_range(),
        }
    }

    /// v(t) = target + (from - target) * e^(-(t - start) / tau)
    fn value_at(&self, t: f64) -> f32 {
        let raw = match self.ramp {
            None => self.value,
            Some(r) if t < r.start => r.from,
            Some(r) if r.time_constant <= 0.0 => r.target,
            Some(r) => {
                let decay = (-(t - r.start) / r.time_constant).exp() as f32;
                r.target + (r.from - r.target) * decay
            }
        };
        raw.clamp(self.range.0, self.range.1)
    }

    fn set_value(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    fn set_target(&mut self, target: f32, start: f64, time_constant: f64) {
        let from = self.value_at(start);
        self.ramp = Some(Ramp {
            from,
            target,
            start,
            time_constant,
        });
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// Playback record of a started buffer source
#[derive(Debug, Clone)]
pub struct SourcePlayback {
    pub buffer: Arc<AudioBuffer>,
    pub looping: bool,
    /// Context time when `start` was called
    pub started_at: f64,
    /// Offset into the buffer at start, seconds
    pub offset: f64,
    /// Context time when `stop` was called
    pub stopped_at: Option<f64>,
}

#[derive(Debug)]
struct OfflineNode {
    role: NodeRole,
    params: HashMap<AudioParam, ParamTimeline>,
    filter_type: FilterType,
    convolver_buffer: Option<Arc<AudioBuffer>>,
    fft_size: usize,
    playback: Option<SourcePlayback>,
    stream_id: Option<String>,
}

impl OfflineNode {
    fn new(role: NodeRole) -> Self {
        Self {
            role,
            params: role
                .params()
                .iter()
                .map(|&p| (p, ParamTimeline::new(p)))
                .collect(),
            filter_type: FilterType::default(),
            convolver_buffer: None,
            fft_size: DEFAULT_FFT_SIZE,
            playback: None,
            stream_id: None,
        }
    }
}

// ============================================================================
// Offline Context
// ============================================================================

/// Control-plane-only processing context
pub struct OfflineContext {
    sample_rate: u32,
    clock: Arc<dyn Clock>,
    origin: f64,
    state: ContextState,
    nodes: HashMap<NodeHandle, OfflineNode>,
    edges: Vec<(NodeHandle, NodeHandle)>,
    next_handle: u32,
    destination: NodeHandle,
}

impl OfflineContext {
    /// Create a running context; its time starts at the clock's current value
    pub fn new(sample_rate: u32, clock: Arc<dyn Clock>) -> Self {
        let origin = clock.now();
        let mut ctx = Self {
            sample_rate,
            clock,
            origin,
            state: ContextState::Running,
            nodes: HashMap::new(),
            edges: Vec::new(),
            next_handle: 1, // Start from 1 (0 is reserved)
            destination: NodeHandle::new(0),
        };
        ctx.destination = ctx.insert_node(OfflineNode::new(NodeRole::Destination));
        ctx
    }

    /// All edges in creation order
    pub fn edges(&self) -> &[(NodeHandle, NodeHandle)] {
        &self.edges
    }

    pub fn role_of(&self, node: NodeHandle) -> Option<NodeRole> {
        self.nodes.get(&node).map(|n| n.role)
    }

    pub fn filter_type(&self, node: NodeHandle) -> Option<FilterType> {
        self.nodes.get(&node).map(|n| n.filter_type)
    }

    pub fn convolver_buffer(&self, node: NodeHandle) -> Option<Arc<AudioBuffer>> {
        self.nodes.get(&node).and_then(|n| n.convolver_buffer.clone())
    }

    pub fn fft_size(&self, node: NodeHandle) -> Option<usize> {
        self.nodes.get(&node).map(|n| n.fft_size)
    }

    pub fn playback(&self, node: NodeHandle) -> Option<&SourcePlayback> {
        self.nodes.get(&node).and_then(|n| n.playback.as_ref())
    }

    /// Id of the capture stream wrapped by a stream source node
    pub fn stream_id(&self, node: NodeHandle) -> Option<&str> {
        self.nodes.get(&node).and_then(|n| n.stream_id.as_deref())
    }

    /// Buffer sources started and not yet stopped
    pub fn playing_sources(&self) -> usize {
        self.nodes
            .values()
            .filter_map(|n| n.playback.as_ref())
            .filter(|p| p.stopped_at.is_none())
            .count()
    }

    fn insert_node(&mut self, node: OfflineNode) -> NodeHandle {
        let handle = NodeHandle::new(self.next_handle);
        self.next_handle += 1;
        self.nodes.insert(handle, node);
        handle
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state {
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(KtvError::invalid_state("processing context is closed")),
        }
    }

    fn node(&self, handle: NodeHandle) -> Result<&OfflineNode> {
        self.nodes
            .get(&handle)
            .ok_or_else(|| KtvError::backend(format!("unknown node handle {}", handle.raw())))
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut OfflineNode> {
        self.nodes
            .get_mut(&handle)
            .ok_or_else(|| KtvError::backend(format!("unknown node handle {}", handle.raw())))
    }

    fn node_of_role(&mut self, handle: NodeHandle, role: NodeRole) -> Result<&mut OfflineNode> {
        let node = self.node_mut(handle)?;
        if node.role != role {
            return Err(KtvError::backend(format!(
                "node {} is a {}, not a {}",
                handle.raw(),
                node.role,
                role
            )));
        }
        Ok(node)
    }

    fn timeline_mut(&mut self, handle: NodeHandle, param: AudioParam) -> Result<&mut ParamTimeline> {
        let node = self.node_mut(handle)?;
        let role = node.role;
        node.params.get_mut(&param).ok_or_else(|| {
            KtvError::backend(format!("a {} node has no '{}' parameter", role, param))
        })
    }
}

impl AudioContext for OfflineContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        (self.clock.now() - self.origin).max(0.0)
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn destination(&self) -> NodeHandle {
        self.destination
    }

    fn create_node(&mut self, role: NodeRole) -> Result<NodeHandle> {
        self.ensure_running()?;
        match role {
            NodeRole::StreamSource => Err(KtvError::backend(
                "stream sources are created from a capture stream",
            )),
            NodeRole::Destination => Err(KtvError::backend(
                "a context has exactly one destination",
            )),
            _ => Ok(self.insert_node(OfflineNode::new(role))),
        }
    }

    fn create_stream_source(&mut self, stream: &CaptureStream) -> Result<NodeHandle> {
        self.ensure_running()?;
        if stream.live_track_count() == 0 {
            return Err(KtvError::invalid_state(format!(
                "capture stream '{}' has no live tracks",
                stream.id()
            )));
        }
        let mut node = OfflineNode::new(NodeRole::StreamSource);
        node.stream_id = Some(stream.id().to_string());
        Ok(self.insert_node(node))
    }

    fn connect(&mut self, source: NodeHandle, target: NodeHandle) -> Result<()> {
        self.ensure_running()?;
        let source_role = self.node(source)?.role;
        let target_role = self.node(target)?.role;

        if !source_role.has_output() {
            return Err(KtvError::backend(format!("a {} node has no output", source_role)));
        }
        if !target_role.has_input() {
            return Err(KtvError::backend(format!("a {} node has no input", target_role)));
        }

        if !self.edges.contains(&(source, target)) {
            self.edges.push((source, target));
        }
        Ok(())
    }

    fn disconnect(&mut self, node: NodeHandle) -> Result<()> {
        self.ensure_running()?;
        self.node(node)?;
        self.edges.retain(|&(source, _)| source != node);
        Ok(())
    }

    fn set_param_value(&mut self, node: NodeHandle, param: AudioParam, value: f32) -> Result<()> {
        self.ensure_running()?;
        self.timeline_mut(node, param)?.set_value(value);
        Ok(())
    }

    fn set_target_at_time(
        &mut self,
        node: NodeHandle,
        param: AudioParam,
        target: f32,
        start_time: f64,
        time_constant: f64,
    ) -> Result<()> {
        self.ensure_running()?;
        if !target.is_finite() || !time_constant.is_finite() || time_constant < 0.0 {
            return Err(KtvError::backend(format!(
                "invalid automation for '{}': target {}, time constant {}",
                param, target, time_constant
            )));
        }
        self.timeline_mut(node, param)?
            .set_target(target, start_time, time_constant);
        Ok(())
    }

    fn param_value(&self, node: NodeHandle, param: AudioParam) -> Result<f32> {
        let now = self.current_time();
        let node_ref = self.node(node)?;
        node_ref
            .params
            .get(&param)
            .map(|timeline| timeline.value_at(now))
            .ok_or_else(|| {
                KtvError::backend(format!("a {} node has no '{}' parameter", node_ref.role, param))
            })
    }

    fn set_filter_type(&mut self, node: NodeHandle, filter_type: FilterType) -> Result<()> {
        self.ensure_running()?;
        self.node_of_role(node, NodeRole::BiquadFilter)?.filter_type = filter_type;
        Ok(())
    }

    fn set_convolver_buffer(&mut self, node: NodeHandle, buffer: Arc<AudioBuffer>) -> Result<()> {
        self.ensure_running()?;
        if buffer.is_empty() {
            return Err(KtvError::backend("convolver kernel is empty"));
        }
        if buffer.sample_rate() != self.sample_rate {
            return Err(KtvError::backend(format!(
                "convolver kernel is {} Hz, context runs at {} Hz",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }
        self.node_of_role(node, NodeRole::Convolver)?.convolver_buffer = Some(buffer);
        Ok(())
    }

    fn set_analyser_fft_size(&mut self, node: NodeHandle, fft_size: usize) -> Result<()> {
        self.ensure_running()?;
        if !(32..=32768).contains(&fft_size) || !fft_size.is_power_of_two() {
            return Err(KtvError::backend(format!(
                "fft size {} must be a power of two in 32..=32768",
                fft_size
            )));
        }
        self.node_of_role(node, NodeRole::Analyser)?.fft_size = fft_size;
        Ok(())
    }

    fn start_buffer_source(
        &mut self,
        node: NodeHandle,
        buffer: Arc<AudioBuffer>,
        looping: bool,
        offset: f64,
    ) -> Result<()> {
        self.ensure_running()?;
        let now = self.current_time();
        let source = self.node_of_role(node, NodeRole::BufferSource)?;
        if source.playback.is_some() {
            return Err(KtvError::invalid_state(
                "a buffer source can only be started once",
            ));
        }
        source.playback = Some(SourcePlayback {
            buffer,
            looping,
            started_at: now,
            offset: offset.max(0.0),
            stopped_at: None,
        });
        Ok(())
    }

    fn stop_source(&mut self, node: NodeHandle) -> Result<()> {
        self.ensure_running()?;
        let now = self.current_time();
        let source = self.node_of_role(node, NodeRole::BufferSource)?;
        match source.playback.as_mut() {
            Some(playback) => {
                playback.stopped_at.get_or_insert(now);
                Ok(())
            }
            None => Err(KtvError::invalid_state(
                "cannot stop a buffer source that was never started",
            )),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_running()?;
        let now = self.current_time();
        for playback in self.nodes.values_mut().filter_map(|n| n.playback.as_mut()) {
            playback.stopped_at.get_or_insert(now);
        }
        self.state = ContextState::Closed;
        Ok(())
    }
}

/// Hands out a new [`OfflineContext`] per session, all sharing one clock
#[derive(Clone)]
pub struct OfflineContextFactory {
    clock: Arc<dyn Clock>,
}

impl OfflineContextFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Factory driven by the wall clock
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}

impl ContextFactory for OfflineContextFactory {
    fn create(&mut self, sample_rate: u32) -> Result<Box<dyn AudioContext>> {
        if sample_rate == 0 {
            return Err(KtvError::backend("sample rate must be positive"));
        }
        Ok(Box::new(OfflineContext::new(sample_rate, Arc::clone(&self.clock))))
    }
}
