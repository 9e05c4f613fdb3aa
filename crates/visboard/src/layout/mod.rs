//! Canvas layout
//!
//! Every branch node is a root. Its direct knowledge children fan out to the
//! left and right through one layered pass per side, `top` children form a
//! row above it, and nested knowledge (`parent_id` chains) cascades outward
//! in horizontal rows.

pub mod engine;
pub mod layered;

pub use engine::{
    BRANCH_SIZE, HORIZONTAL_SPACING, KNOWLEDGE_SIZE, LayoutOptions, NodeSize, VERTICAL_SPACING,
    compute_layout, compute_layout_with,
};

use visboard_api::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("parent chain of node {id} loops back on itself")]
    Cycle { id: String },

    #[error("node id {id} appears more than once")]
    DuplicateNode { id: String },
}

impl From<LayoutError> for ApiError {
    fn from(e: LayoutError) -> Self {
        ApiError::InvalidOperation {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use visboard_api::{BranchData, KnowledgeData, Node, Side};

    fn side() -> impl Strategy<Value = Side> {
        prop_oneof![Just(Side::Left), Just(Side::Right), Just(Side::Top)]
    }

    /// Branches `b0..bN` and knowledge `k0..kM`; each knowledge either hangs
    /// off a branch or off an earlier knowledge node, so input is acyclic.
    fn board() -> impl Strategy<Value = Vec<Node>> {
        (1usize..4, prop::collection::vec((any::<prop::sample::Index>(), side(), any::<bool>()), 0..24))
            .prop_map(|(branches, specs)| {
                let mut nodes: Vec<Node> = (0..branches)
                    .map(|b| Node::branch(format!("b{b}"), BranchData::default()))
                    .collect();
                for (k, (pick, side, nested)) in specs.into_iter().enumerate() {
                    let branch_id = format!("b{}", pick.index(branches));
                    let parent_id = (nested && k > 0).then(|| format!("k{}", pick.index(k)));
                    nodes.push(Node::knowledge(
                        format!("k{k}"),
                        KnowledgeData {
                            branch_id,
                            title: None,
                            content: String::new(),
                            timestamp: k as i64,
                            took_seconds: 0.0,
                            token_per_second: 0.0,
                            parent_id,
                            side,
                        },
                    ));
                }
                nodes
            })
    }

    proptest! {
        #[test]
        fn every_node_is_placed_once(nodes in board()) {
            let out = compute_layout(&nodes, &[]).unwrap();
            let ids_in: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
            let ids_out: Vec<&str> = out.iter().map(|n| n.id.as_str()).collect();
            prop_assert_eq!(ids_in, ids_out);
        }

        #[test]
        fn layout_is_deterministic(nodes in board()) {
            prop_assert_eq!(compute_layout(&nodes, &[]).unwrap(), compute_layout(&nodes, &[]).unwrap());
        }

        #[test]
        fn direct_children_respect_their_side(nodes in board()) {
            let out = compute_layout(&nodes, &[]).unwrap();
            for node in &out {
                let Some(data) = node.as_knowledge() else { continue };
                if data.parent_id.is_some() {
                    continue;
                }
                let root = out.iter().find(|n| n.id == data.branch_id).unwrap();
                prop_assert_eq!(root.position, nodes.iter().find(|n| n.id == root.id).unwrap().position);
                match data.side {
                    Side::Left => prop_assert!(node.position.x < root.position.x),
                    Side::Right => prop_assert!(node.position.x > root.position.x),
                    Side::Top => prop_assert!(node.position.y < root.position.y),
                }
            }
        }
    }
}
