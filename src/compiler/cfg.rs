//! Per-method control-flow graph.
//!
//! The graph is threaded through checking by a cursor: every checked
//! statement appends nodes after the cursor and advances it. Two node
//! shapes exist — plain nodes with a single predecessor and joiners that
//! collect edges from several paths (if/else, loops, switch, the
//! short-circuit operators). A joiner that ends up with no incoming
//! edges reduces to unreachable, and one with a single edge reduces to a
//! forwarder; downstream analyses assume these reductions and never walk
//! trivial joiners.
//!
//! Traversals stamp nodes with a marker drawn from a counter owned by
//! the graph instead of keeping per-walk visited sets. Only one
//! traversal is ever in flight.

use crate::compiler::datatypes::DataType;
use crate::compiler::registry::{MemberRef, MethodKey, ParamMode};
use crate::compiler::string_interning::StringId;
use crate::compiler::tokenizer::tokens::TextLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalId(pub u32);

/// Index into a method's recorded owning-expression spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempId(pub u32);

/// A storage location the `take` operator can move out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeTarget {
    Local(LocalId),
    Field(MemberRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Var,
    Param(ParamMode),
}

/// A local variable or parameter of one method.
#[derive(Debug, Clone)]
pub struct Local {
    pub name: StringId,
    pub data_type: DataType,
    pub kind: LocalKind,
    pub location: TextLocation,

    /// Written again after initialization.
    pub mutable: bool,

    /// Set by the ref-count analysis; emission spills flagged locals
    /// into a ref-counted handle.
    pub needs_ref: bool,

    /// Every node that reads this local.
    pub uses: Vec<FlowId>,

    /// Every node that assigns this local.
    pub assignments: Vec<FlowId>,
}

impl Local {
    pub fn new(
        name: StringId,
        data_type: DataType,
        kind: LocalKind,
        location: TextLocation,
    ) -> Self {
        Local {
            name,
            data_type,
            kind,
            location,
            // ref/out parameters are always written by the callee
            mutable: matches!(kind, LocalKind::Param(ParamMode::Ref | ParamMode::Out)),
            needs_ref: false,
            uses: Vec::new(),
            assignments: Vec::new(),
        }
    }

    pub fn is_param(&self) -> bool {
        matches!(self.kind, LocalKind::Param(_))
    }
}

/// What executing this program point can do, as far as the analyses
/// care: call a method, assign a local, move out of a local, destroy
/// values of some types.
#[derive(Debug, Clone, Default)]
pub struct NodeEffect {
    pub calls: Option<MethodKey>,
    pub sets: Option<LocalId>,
    pub sets_field: Option<MemberRef>,
    pub takes: Option<TakeTarget>,
    pub destroys: Vec<DataType>,

    /// Locals whose binding ends at this node (scope exits and jumps).
    /// The ref-count walk for a local stops here instead of reading the
    /// node's own destruction of that binding as a threat to it.
    pub destroys_locals: Vec<LocalId>,
}

impl NodeEffect {
    pub fn none() -> Self {
        NodeEffect::default()
    }

    pub fn setting(local: LocalId) -> Self {
        NodeEffect {
            sets: Some(local),
            ..NodeEffect::default()
        }
    }

    pub fn calling(key: MethodKey) -> Self {
        NodeEffect {
            calls: Some(key),
            ..NodeEffect::default()
        }
    }

    pub fn destroying(types: Vec<DataType>) -> Self {
        NodeEffect {
            destroys: types,
            ..NodeEffect::default()
        }
    }
}

#[derive(Debug)]
pub struct FlowNode {
    pub preds: Vec<FlowId>,
    pub succs: Vec<FlowId>,
    pub is_joiner: bool,
    pub effect: NodeEffect,
    pub location: TextLocation,
    marker: u32,
}

/// Where the next node will attach. `Unreachable` after break/continue/
/// return; nodes appended there get no predecessors and stay dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Unreachable,
    At(FlowId),
}

#[derive(Debug)]
pub struct FlowGraph {
    nodes: Vec<FlowNode>,
    marker: u32,
    pub entry: FlowId,
    pub cursor: Cursor,
}

impl FlowGraph {
    pub fn new() -> Self {
        let mut graph = FlowGraph {
            nodes: Vec::new(),
            marker: 0,
            entry: FlowId(0),
            cursor: Cursor::Unreachable,
        };
        graph.entry = graph.push_node(false, NodeEffect::none(), TextLocation::default());
        graph.cursor = Cursor::At(graph.entry);
        graph
    }

    fn push_node(&mut self, is_joiner: bool, effect: NodeEffect, location: TextLocation) -> FlowId {
        let id = FlowId(self.nodes.len() as u32);
        self.nodes.push(FlowNode {
            preds: Vec::new(),
            succs: Vec::new(),
            is_joiner,
            effect,
            location,
            marker: 0,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: FlowId) -> &FlowNode {
        &self.nodes[id.0 as usize]
    }

    pub fn effect(&self, id: FlowId) -> &NodeEffect {
        &self.nodes[id.0 as usize].effect
    }

    pub fn effect_mut(&mut self, id: FlowId) -> &mut NodeEffect {
        &mut self.nodes[id.0 as usize].effect
    }

    pub fn preds(&self, id: FlowId) -> &[FlowId] {
        &self.nodes[id.0 as usize].preds
    }

    pub fn succs(&self, id: FlowId) -> &[FlowId] {
        &self.nodes[id.0 as usize].succs
    }

    /// Append a plain node after the cursor and advance onto it.
    /// Appending while unreachable still creates the node so later uses
    /// have somewhere to hang, but it gets no incoming edge.
    pub fn add_node(&mut self, effect: NodeEffect, location: TextLocation) -> FlowId {
        let id = self.push_node(false, effect, location);
        if let Cursor::At(prev) = self.cursor {
            self.nodes[id.0 as usize].preds.push(prev);
        }
        self.cursor = Cursor::At(id);
        id
    }

    /// Create a joiner with no edges yet. Edges are added with
    /// [`FlowGraph::join`]; merge joiners are reduced once complete.
    pub fn new_joiner(&mut self) -> FlowId {
        self.push_node(true, NodeEffect::none(), TextLocation::default())
    }

    /// Route a cursor into a joiner. Unreachable cursors contribute
    /// nothing.
    pub fn join(&mut self, joiner: FlowId, from: Cursor) {
        debug_assert!(self.nodes[joiner.0 as usize].is_joiner);
        if let Cursor::At(prev) = from {
            self.nodes[joiner.0 as usize].preds.push(prev);
        }
    }

    /// Reduce a completed merge joiner: no incoming edges means the
    /// merge point is unreachable, a single edge means the joiner is a
    /// pure forwarder and the edge source stands in for it.
    pub fn combine_joiner(&mut self, joiner: FlowId) -> Cursor {
        let preds = &self.nodes[joiner.0 as usize].preds;
        match preds.len() {
            0 => Cursor::Unreachable,
            1 => Cursor::At(preds[0]),
            _ => Cursor::At(joiner),
        }
    }

    /// Loop headers keep their joiner alive (back edges arrive after the
    /// body is checked), so the cursor moves onto it directly.
    pub fn enter_joiner(&mut self, joiner: FlowId) {
        self.cursor = Cursor::At(joiner);
    }

    /// Derive successor lists from the predecessor edges. Called once
    /// after a method's graph is complete; the forward walks of the
    /// ref-count analysis need them.
    pub fn finalize(&mut self) {
        for idx in 0..self.nodes.len() {
            self.nodes[idx].succs.clear();
        }
        for idx in 0..self.nodes.len() {
            let id = FlowId(idx as u32);
            let preds = self.nodes[idx].preds.clone();
            for pred in preds {
                self.nodes[pred.0 as usize].succs.push(id);
            }
        }
    }

    // --------------------------------------------------------------
    //  Marker-based traversal
    // --------------------------------------------------------------

    /// Start a fresh traversal. All nodes now carry a stale marker.
    pub fn next_marker(&mut self) -> u32 {
        self.marker += 1;
        self.marker
    }

    /// Stamp a node with the current marker. True on first visit.
    pub fn mark(&mut self, id: FlowId) -> bool {
        let node = &mut self.nodes[id.0 as usize];
        if node.marker == self.marker {
            return false;
        }
        node.marker = self.marker;
        true
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_node_is_cursor_start() {
        let graph = FlowGraph::new();
        assert_eq!(graph.cursor, Cursor::At(graph.entry));
        assert!(graph.preds(graph.entry).is_empty());
    }

    #[test]
    fn add_node_links_from_cursor() {
        let mut graph = FlowGraph::new();
        let a = graph.add_node(NodeEffect::none(), TextLocation::default());
        let b = graph.add_node(NodeEffect::none(), TextLocation::default());
        assert_eq!(graph.preds(a), &[graph.entry]);
        assert_eq!(graph.preds(b), &[a]);
        assert_eq!(graph.cursor, Cursor::At(b));
    }

    #[test]
    fn empty_joiner_reduces_to_unreachable() {
        let mut graph = FlowGraph::new();
        let joiner = graph.new_joiner();
        assert_eq!(graph.combine_joiner(joiner), Cursor::Unreachable);
    }

    #[test]
    fn single_edge_joiner_forwards() {
        let mut graph = FlowGraph::new();
        let a = graph.add_node(NodeEffect::none(), TextLocation::default());
        let joiner = graph.new_joiner();
        graph.join(joiner, Cursor::At(a));
        assert_eq!(graph.combine_joiner(joiner), Cursor::At(a));
    }

    #[test]
    fn two_edge_joiner_survives() {
        let mut graph = FlowGraph::new();
        let a = graph.add_node(NodeEffect::none(), TextLocation::default());
        graph.cursor = Cursor::At(graph.entry);
        let b = graph.add_node(NodeEffect::none(), TextLocation::default());
        let joiner = graph.new_joiner();
        graph.join(joiner, Cursor::At(a));
        graph.join(joiner, Cursor::At(b));
        assert_eq!(graph.combine_joiner(joiner), Cursor::At(joiner));
        assert_eq!(graph.preds(joiner), &[a, b]);
    }

    #[test]
    fn unreachable_cursor_adds_orphan_nodes() {
        let mut graph = FlowGraph::new();
        graph.cursor = Cursor::Unreachable;
        let orphan = graph.add_node(NodeEffect::none(), TextLocation::default());
        assert!(graph.preds(orphan).is_empty());
    }

    #[test]
    fn markers_distinguish_traversals() {
        let mut graph = FlowGraph::new();
        let a = graph.add_node(NodeEffect::none(), TextLocation::default());

        graph.next_marker();
        assert!(graph.mark(a));
        assert!(!graph.mark(a));

        graph.next_marker();
        assert!(graph.mark(a));
    }

    #[test]
    fn finalize_builds_successors() {
        let mut graph = FlowGraph::new();
        let a = graph.add_node(NodeEffect::none(), TextLocation::default());
        let b = graph.add_node(NodeEffect::none(), TextLocation::default());
        graph.finalize();
        assert_eq!(graph.succs(graph.entry), &[a]);
        assert_eq!(graph.succs(a), &[b]);
        assert!(graph.succs(b).is_empty());
    }
}
