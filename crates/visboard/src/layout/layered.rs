//! Layered ("Sugiyama-style") placement, left-to-right rank direction.
//!
//! Ranks come from the longest path from the sources, walked in
//! topological order. Nodes keep their
//! insertion order inside a rank. Each rank is a column as wide as its widest
//! node, columns are separated by `rank_sep` and nodes inside a column by
//! `node_sep`. Every column is centred on `y = 0`.

use super::LayoutError;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use visboard_api::Position;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayeredConfig {
    /// Horizontal gap between adjacent ranks
    pub rank_sep: f64,
    /// Vertical gap between nodes of the same rank
    pub node_sep: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct LayerNode {
    id: String,
    width: f64,
    height: f64,
}

#[derive(Debug, Default)]
pub struct LayeredGraph {
    graph: DiGraph<LayerNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl LayeredGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str, width: f64, height: f64) -> Result<(), LayoutError> {
        if self.index.contains_key(id) {
            return Err(LayoutError::DuplicateNode { id: id.to_string() });
        }
        let idx = self.graph.add_node(LayerNode {
            id: id.to_string(),
            width,
            height,
        });
        self.index.insert(id.to_string(), idx);
        Ok(())
    }

    /// Add a directed edge. Edges naming unknown nodes are ignored.
    pub fn add_edge(&mut self, source: &str, target: &str) {
        if let (Some(&s), Some(&t)) = (self.index.get(source), self.index.get(target)) {
            self.graph.add_edge(s, t, ());
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Longest-path rank of every node, indexed like the graph's nodes.
    fn ranks(&self) -> Result<Vec<usize>, LayoutError> {
        let order = toposort(&self.graph, None).map_err(|cycle| LayoutError::Cycle {
            id: self.graph[cycle.node_id()].id.clone(),
        })?;

        let mut rank = vec![0usize; self.graph.node_count()];
        for node in order {
            let next_rank = rank[node.index()] + 1;
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                rank[next.index()] = rank[next.index()].max(next_rank);
            }
        }
        Ok(rank)
    }

    /// Centre position of every node, keyed by id.
    pub fn layout(&self, config: &LayeredConfig) -> Result<HashMap<String, Position>, LayoutError> {
        let ranks = self.ranks()?;
        let rank_count = ranks.iter().copied().max().map_or(0, |r| r + 1);

        // node indices follow insertion order, so a rank keeps it too
        let mut layers: Vec<Vec<NodeIndex>> = vec![Vec::new(); rank_count];
        for node in self.graph.node_indices() {
            layers[ranks[node.index()]].push(node);
        }

        let mut positions = HashMap::with_capacity(self.graph.node_count());
        let mut column_left = 0.0;
        for layer in &layers {
            let column_width = layer
                .iter()
                .map(|&i| self.graph[i].width)
                .fold(0.0, f64::max);
            let column_height = layer.iter().map(|&i| self.graph[i].height).sum::<f64>()
                + config.node_sep * layer.len().saturating_sub(1) as f64;

            let mut top = -column_height / 2.0;
            for &i in layer {
                let node = &self.graph[i];
                positions.insert(
                    node.id.clone(),
                    Position::new(column_left + column_width / 2.0, top + node.height / 2.0),
                );
                top += node.height + config.node_sep;
            }
            column_left += column_width + config.rank_sep;
        }
        Ok(positions)
    }
}
