//! Graph and list views of the trace for the visualization layer.
//!
//! Nodes appear in discovery order and keep their position for the whole
//! session; an address record's `graph_index` points at its node.

use std::collections::HashMap;

use alloy::primitives::Address;
use flowtrace_data::Transfer;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

/// One traced address and its outgoing transfers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: Address,
    pub connections: Vec<Transfer>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GraphProjection {
    nodes: Vec<GraphNode>,
}

impl GraphProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node and returns its stable index.
    pub fn push_node(&mut self, id: Address) -> usize {
        self.nodes.push(GraphNode {
            id,
            connections: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn extend_connections(&mut self, index: usize, transfers: impl IntoIterator<Item = Transfer>) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.connections.extend(transfers);
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&GraphNode> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn transfer_count(&self) -> usize {
        self.nodes.iter().map(|n| n.connections.len()).sum()
    }

    /// Every transfer, sorted by block number. Ties keep discovery order.
    pub fn transfer_list(&self) -> Vec<Transfer> {
        let mut list: Vec<Transfer> = self
            .nodes
            .iter()
            .flat_map(|node| node.connections.iter().cloned())
            .collect();
        list.sort_by_key(|t| t.block_number);
        list
    }

    /// Directed multigraph with one edge per transfer.
    ///
    /// Uses `add_edge` so repeated transfers between the same pair stay separate.
    pub fn to_graph(&self) -> DiGraph<Address, Transfer> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.transfer_count());
        let mut addr_to_ix: HashMap<Address, NodeIndex> = HashMap::new();

        for node in &self.nodes {
            addr_to_ix.insert(node.id, graph.add_node(node.id));
        }
        for node in &self.nodes {
            let from_ix = addr_to_ix[&node.id];
            for transfer in &node.connections {
                let to_ix = *addr_to_ix
                    .entry(transfer.to)
                    .or_insert_with(|| graph.add_node(transfer.to));
                graph.add_edge(from_ix, to_ix, transfer.clone());
            }
        }
        graph
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
