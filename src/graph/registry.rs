//! Node Registry
//!
//! Owns the named nodes and capture streams of one session and builds the
//! connections between them. A registry is never reused: the next session
//! starts from an empty one.

use std::collections::{BTreeMap, BTreeSet};

use crate::audio::{AudioContext, CaptureStream, NodeHandle, NodeRole};
use crate::error::{KtvError, Result};
use crate::graph::node::TypedNode;

#[derive(Debug, Clone, Copy)]
struct RegisteredNode {
    role: NodeRole,
    handle: NodeHandle,
}

/// A directed edge between two registered nodes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Connection {
    pub source: String,
    pub target: String,
}

/// Node names and edges of a session, order-independent
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopologySnapshot {
    pub nodes: BTreeSet<String>,
    pub edges: BTreeSet<(String, String)>,
}

/// Name → node table for one session
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, RegisteredNode>,
    streams: BTreeMap<String, CaptureStream>,
    connections: Vec<Connection>,
    sealed: bool,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node under `name`
    ///
    /// # Errors
    /// * `DuplicateNode` - the name is taken
    /// * `InvalidState` - the topology has already been sealed
    pub fn insert(&mut self, name: &str, role: NodeRole, handle: NodeHandle) -> Result<()> {
        self.ensure_open(name)?;
        if self.nodes.contains_key(name) {
            return Err(KtvError::DuplicateNode {
                name: name.to_string(),
            });
        }
        self.nodes
            .insert(name.to_string(), RegisteredNode { role, handle });
        Ok(())
    }

    /// Register a typed node under `name`
    pub fn insert_node<T: TypedNode>(&mut self, name: &str, node: T) -> Result<()> {
        self.insert(name, T::ROLE, node.handle())
    }

    /// Take ownership of a capture stream
    ///
    /// A rejected stream has its tracks stopped before the error is returned
    /// so the device is never left held.
    pub fn insert_stream(&mut self, name: &str, mut stream: CaptureStream) -> Result<()> {
        let rejection = if self.sealed {
            Some(KtvError::invalid_state(format!(
                "cannot add stream '{}' after the topology is sealed",
                name
            )))
        } else if self.streams.contains_key(name) {
            Some(KtvError::DuplicateNode {
                name: name.to_string(),
            })
        } else {
            None
        };

        if let Some(err) = rejection {
            stream.stop_all_tracks();
            return Err(err);
        }

        self.streams.insert(name.to_string(), stream);
        Ok(())
    }

    /// Resolve `name` to a typed node
    ///
    /// # Errors
    /// * `GraphReference` - nothing is registered under `name`, or the node
    ///   registered there has a different role
    pub fn get<T: TypedNode>(&self, name: &str) -> Result<T> {
        let entry = self.entry(name)?;
        if entry.role != T::ROLE {
            return Err(KtvError::graph_reference(format!(
                "node '{}' is a {}, expected a {}",
                name,
                entry.role,
                T::ROLE
            )));
        }
        Ok(T::from_handle(entry.handle))
    }

    /// Resolve `name` without a role check
    pub fn lookup(&self, name: &str) -> Result<(NodeRole, NodeHandle)> {
        self.entry(name).map(|entry| (entry.role, entry.handle))
    }

    /// Borrow a registered capture stream
    pub fn stream(&self, name: &str) -> Result<&CaptureStream> {
        self.streams
            .get(name)
            .ok_or_else(|| KtvError::graph_reference(format!("no stream named '{}'", name)))
    }

    /// Connect two registered nodes
    ///
    /// # Errors
    /// * `GraphReference` - either endpoint is not registered
    /// * `InvalidState` - the topology has already been sealed
    pub fn connect(&mut self, ctx: &mut dyn AudioContext, source: &str, target: &str) -> Result<()> {
        if self.sealed {
            return Err(KtvError::invalid_state(format!(
                "cannot connect '{}' -> '{}': topology is sealed",
                source, target
            )));
        }
        let from = self.entry(source)?.handle;
        let to = self.entry(target)?.handle;

        ctx.connect(from, to)?;
        let connection = Connection {
            source: source.to_string(),
            target: target.to_string(),
        };
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
        Ok(())
    }

    /// Connect each consecutive pair of `names`; fewer than two names is a no-op
    pub fn connect_chain(&mut self, ctx: &mut dyn AudioContext, names: &[&str]) -> Result<()> {
        for pair in names.windows(2) {
            self.connect(ctx, pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Stop every hardware track of every stream; idempotent
    pub fn stop_all(&mut self) {
        for stream in self.streams.values_mut() {
            stream.stop_all_tracks();
        }
    }

    /// Freeze the topology: no more nodes, streams or connections
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Registered node names, sorted
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|name| name.as_str())
    }

    /// Connections in the order they were made
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Tracks still holding a device, across all streams
    pub fn live_track_count(&self) -> usize {
        self.streams.values().map(|s| s.live_track_count()).sum()
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot {
            nodes: self.nodes.keys().cloned().collect(),
            edges: self
                .connections
                .iter()
                .map(|c| (c.source.clone(), c.target.clone()))
                .collect(),
        }
    }

    fn entry(&self, name: &str) -> Result<RegisteredNode> {
        self.nodes
            .get(name)
            .copied()
            .ok_or_else(|| KtvError::graph_reference(format!("no node named '{}'", name)))
    }

    fn ensure_open(&self, name: &str) -> Result<()> {
        if self.sealed {
            return Err(KtvError::invalid_state(format!(
                "cannot register '{}' after the topology is sealed",
                name
            )));
        }
        Ok(())
    }
}
