use super::LayoutError;
use super::layered::{LayeredConfig, LayeredGraph};
use std::collections::{HashMap, HashSet};
use visboard_api::{Edge, Node, NodeKind, Position, Side};

/// Gap between a node and the next rank or the next node of a row.
pub const HORIZONTAL_SPACING: f64 = 64.0;
/// Gap between stacked children of the same side.
pub const VERTICAL_SPACING: f64 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSize {
    pub width: f64,
    pub height: f64,
}

pub const BRANCH_SIZE: NodeSize = NodeSize {
    width: 500.0,
    height: 600.0,
};

pub const KNOWLEDGE_SIZE: NodeSize = NodeSize {
    width: 240.0,
    height: 160.0,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutOptions {
    pub rank_sep: f64,
    pub node_sep: f64,
    /// Gap between consecutive nodes of a nested row
    pub row_gap: f64,
    pub branch_size: NodeSize,
    pub knowledge_size: NodeSize,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            rank_sep: HORIZONTAL_SPACING,
            node_sep: VERTICAL_SPACING,
            row_gap: HORIZONTAL_SPACING,
            branch_size: BRANCH_SIZE,
            knowledge_size: KNOWLEDGE_SIZE,
        }
    }
}

impl LayoutOptions {
    /// Box used for `node`: the per-kind size unless the node carries a
    /// positive width/height of its own.
    pub fn size_of(&self, node: &Node) -> NodeSize {
        let base = match node.kind() {
            NodeKind::Branch => self.branch_size,
            NodeKind::Knowledge => self.knowledge_size,
        };
        NodeSize {
            width: node.width.filter(|w| *w > 0.0).unwrap_or(base.width),
            height: node.height.filter(|h| *h > 0.0).unwrap_or(base.height),
        }
    }

    fn layered(&self) -> LayeredConfig {
        LayeredConfig {
            rank_sep: self.rank_sep,
            node_sep: self.node_sep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Left,
    Right,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Left => -1.0,
            Direction::Right => 1.0,
        }
    }
}

/// Position every branch and knowledge node with the default options.
///
/// Output has the input order; nodes that no branch reaches keep their
/// stored position. Edges are visual only: ownership comes from the
/// `branch_id` and `parent_id` fields of the nodes.
pub fn compute_layout(nodes: &[Node], edges: &[Edge]) -> Result<Vec<Node>, LayoutError> {
    compute_layout_with(nodes, edges, &LayoutOptions::default())
}

pub fn compute_layout_with(
    nodes: &[Node],
    _edges: &[Edge],
    options: &LayoutOptions,
) -> Result<Vec<Node>, LayoutError> {
    let mut placer = Placer::new(nodes, options)?;
    for (index, node) in nodes.iter().enumerate() {
        if node.is_branch() {
            placer.place_root(index)?;
        }
    }

    Ok(nodes
        .iter()
        .zip(placer.placed)
        .map(|(node, placed)| node.clone().with_position(placed.unwrap_or(node.position)))
        .collect())
}

struct Placer<'a> {
    nodes: &'a [Node],
    options: &'a LayoutOptions,
    /// Knowledge without `parent_id`, keyed by owning branch
    direct: HashMap<&'a str, Vec<usize>>,
    /// Knowledge keyed by `parent_id`
    nested: HashMap<&'a str, Vec<usize>>,
    placed: Vec<Option<Position>>,
}

impl<'a> Placer<'a> {
    fn new(nodes: &'a [Node], options: &'a LayoutOptions) -> Result<Self, LayoutError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.as_str(), i).is_some() {
                return Err(LayoutError::DuplicateNode {
                    id: node.id.clone(),
                });
            }
        }
        check_parent_chains(nodes, &index)?;

        let mut direct: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut nested: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if let Some(data) = node.as_knowledge() {
                match &data.parent_id {
                    Some(parent) => nested.entry(parent.as_str()).or_default().push(i),
                    None => direct.entry(data.branch_id.as_str()).or_default().push(i),
                }
            }
        }

        Ok(Self {
            nodes,
            options,
            direct,
            nested,
            placed: vec![None; nodes.len()],
        })
    }

    fn side(&self, index: usize) -> Side {
        self.nodes[index]
            .as_knowledge()
            .map(|k| k.side)
            .unwrap_or(Side::Right)
    }

    fn place_root(&mut self, root: usize) -> Result<(), LayoutError> {
        let origin = self.nodes[root].position;
        self.placed[root] = Some(origin);

        let children = self
            .direct
            .get(self.nodes[root].id.as_str())
            .cloned()
            .unwrap_or_default();
        if children.is_empty() {
            return Ok(());
        }

        self.place_side(root, &children, Side::Left)?;
        self.place_side(root, &children, Side::Right)?;
        self.place_top(root, &children);

        for &child in &children {
            let direction = match self.side(child) {
                Side::Left => Direction::Left,
                Side::Right => Direction::Right,
                Side::Top => match self.placed[child] {
                    Some(p) if p.x < origin.x => Direction::Left,
                    _ => Direction::Right,
                },
            };
            self.cascade(child, direction);
        }
        Ok(())
    }

    /// One layered pass for the root and its children on `side`.
    fn place_side(&mut self, root: usize, children: &[usize], side: Side) -> Result<(), LayoutError> {
        let group: Vec<usize> = children
            .iter()
            .copied()
            .filter(|&c| self.side(c) == side)
            .collect();
        if group.is_empty() {
            return Ok(());
        }

        let root_node = &self.nodes[root];
        let mut graph = LayeredGraph::new();
        let root_size = self.options.size_of(root_node);
        graph.add_node(&root_node.id, root_size.width, root_size.height)?;
        for &child in &group {
            let node = &self.nodes[child];
            let size = self.options.size_of(node);
            graph.add_node(&node.id, size.width, size.height)?;
            graph.add_edge(&root_node.id, &node.id);
        }

        let positions = graph.layout(&self.options.layered())?;
        let Some(&root_centre) = positions.get(&root_node.id) else {
            return Ok(());
        };
        let origin = root_node.position;
        for &child in &group {
            if let Some(centre) = positions.get(&self.nodes[child].id) {
                let dx = centre.x - root_centre.x;
                let dx = if side == Side::Left { -dx } else { dx };
                self.placed[child] = Some(origin.offset(dx, centre.y - root_centre.y));
            }
        }
        Ok(())
    }

    /// `top` children: one row centred above the root.
    fn place_top(&mut self, root: usize, children: &[usize]) {
        let group: Vec<usize> = children
            .iter()
            .copied()
            .filter(|&c| self.side(c) == Side::Top)
            .collect();
        if group.is_empty() {
            return;
        }

        let sizes: Vec<NodeSize> = group
            .iter()
            .map(|&c| self.options.size_of(&self.nodes[c]))
            .collect();
        let row_width = sizes.iter().map(|s| s.width).sum::<f64>()
            + self.options.row_gap * (group.len() - 1) as f64;

        let origin = self.nodes[root].position;
        let root_top = origin.y - self.options.size_of(&self.nodes[root]).height / 2.0;
        let mut left = origin.x - row_width / 2.0;
        for (&child, size) in group.iter().zip(&sizes) {
            self.placed[child] = Some(Position::new(
                left + size.width / 2.0,
                root_top - self.options.rank_sep - size.height / 2.0,
            ));
            left += size.width + self.options.row_gap;
        }
    }

    /// Lay the nested children of `parent` in a row moving away from the
    /// root, each sibling past the previous sibling's whole cascade.
    ///
    /// Returns the outer edge reached by the parent's subtree.
    fn cascade(&mut self, parent: usize, direction: Direction) -> f64 {
        let sign = direction.sign();
        let Some(origin) = self.placed[parent] else {
            return 0.0;
        };
        let parent_size = self.options.size_of(&self.nodes[parent]);
        let mut far = origin.x + sign * parent_size.width / 2.0;

        let children = self
            .nested
            .get(self.nodes[parent].id.as_str())
            .cloned()
            .unwrap_or_default();
        for child in children {
            let size = self.options.size_of(&self.nodes[child]);
            let near = far + sign * self.options.row_gap;
            self.placed[child] = Some(Position::new(near + sign * size.width / 2.0, origin.y));
            far = self.cascade(child, direction);
        }
        far
    }
}

/// Reject `parent_id` chains that revisit a node.
fn check_parent_chains(nodes: &[Node], index: &HashMap<&str, usize>) -> Result<(), LayoutError> {
    let mut acyclic: HashSet<usize> = HashSet::new();
    for start in 0..nodes.len() {
        let mut path = HashSet::new();
        let mut current = Some(start);
        while let Some(node) = current {
            if acyclic.contains(&node) {
                break;
            }
            if !path.insert(node) {
                return Err(LayoutError::Cycle {
                    id: nodes[node].id.clone(),
                });
            }
            current = nodes[node]
                .as_knowledge()
                .and_then(|k| k.parent_id.as_deref())
                .and_then(|parent| index.get(parent).copied());
        }
        acyclic.extend(path);
    }
    Ok(())
}
