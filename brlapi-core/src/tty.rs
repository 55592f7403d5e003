//! The tty tree (spec.md §3): an arena of nodes reachable from a
//! virtual-terminal path, each holding its own focus and an ordered
//! list of attached connections. `ROOT` is the `ttys` sentinel every
//! path hangs off of; `NOTTY` is the `notty` sentinel connections in
//! raw or suspend mode are associated with instead of a real node.

use crate::connection::ConnectionId;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TtyId(u32);

impl TtyId {
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TtyId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "tty#{}", self.0)
    }
}

pub const ROOT: TtyId = TtyId(0);
pub const NOTTY: TtyId = TtyId(u32::MAX);

#[derive(Debug)]
struct Node {
    parent: Option<TtyId>,
    children: Vec<TtyId>,
    focus: Option<TtyId>,
    /// Connections attached at this exact node, ordered highest
    /// priority number first (spec.md's arbitrator serves the highest
    /// numeric priority among competing connections).
    connections: Vec<(ConnectionId, u32)>,
}

impl Node {
    fn root() -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            focus: None,
            connections: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct TtyTree {
    nodes: HashMap<TtyId, Node>,
}

impl Default for TtyTree {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, Node::root());
        Self { nodes }
    }
}

impl TtyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazily creates (or reuses) the chain of ttys named by `path`,
    /// each segment nested under the previous one starting at `ROOT`,
    /// and returns the leaf.
    pub fn ensure_path(&mut self, path: &[u32]) -> TtyId {
        let mut parent = ROOT;
        for &segment in path {
            let id = TtyId(segment);
            self.nodes.entry(id).or_insert_with(|| Node {
                parent: Some(parent),
                children: Vec::new(),
                focus: None,
                connections: Vec::new(),
            });
            let siblings = &mut self.nodes.get_mut(&parent).unwrap().children;
            if !siblings.contains(&id) {
                siblings.push(id);
            }
            parent = id;
        }
        parent
    }

    pub fn exists(&self, tty: TtyId) -> bool {
        self.nodes.contains_key(&tty)
    }

    pub fn set_focus(&mut self, tty: TtyId, focus: Option<TtyId>) {
        if let Some(node) = self.nodes.get_mut(&tty) {
            node.focus = focus;
        }
    }

    /// Follows the focus chain from `tty` as far down as it's defined,
    /// stopping at the first node with no declared focus child.
    pub fn resolve_focus(&self, tty: TtyId) -> TtyId {
        let mut current = tty;
        let mut guard = self.nodes.len() + 1;
        while guard > 0 {
            guard -= 1;
            match self.nodes.get(&current).and_then(|n| n.focus) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current
    }

    pub fn add_connection(&mut self, tty: TtyId, connection: ConnectionId, priority: u32) {
        let node = self.nodes.entry(tty).or_insert_with(Node::root);
        node.connections.retain(|(c, _)| *c != connection);
        let pos = node
            .connections
            .iter()
            .position(|(_, p)| *p < priority)
            .unwrap_or(node.connections.len());
        node.connections.insert(pos, (connection, priority));
    }

    /// Removes `connection` from `tty`, then garbage-collects the node
    /// (and any now-empty ancestors) if it has neither connections nor
    /// children left. `ROOT` is never collected.
    pub fn remove_connection(&mut self, tty: TtyId, connection: ConnectionId) {
        if let Some(node) = self.nodes.get_mut(&tty) {
            node.connections.retain(|(c, _)| *c != connection);
        }
        self.gc_from(tty);
    }

    fn gc_from(&mut self, mut tty: TtyId) {
        while tty != ROOT {
            let Some(node) = self.nodes.get(&tty) else {
                break;
            };
            if !node.connections.is_empty() || !node.children.is_empty() {
                break;
            }
            let parent = node.parent;
            self.nodes.remove(&tty);
            if let Some(parent) = parent {
                if let Some(parent_node) = self.nodes.get_mut(&parent) {
                    parent_node.children.retain(|c| *c != tty);
                }
                tty = parent;
            } else {
                break;
            }
        }
    }

    /// Connections at `tty`, ordered by descending priority (the order
    /// the arbitrator should offer them the driver).
    pub fn connections_at(&self, tty: TtyId) -> Vec<ConnectionId> {
        self.nodes
            .get(&tty)
            .map(|n| n.connections.iter().map(|(c, _)| *c).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(n: u64) -> ConnectionId {
        ConnectionId::from_raw(n)
    }

    #[test]
    fn ensure_path_creates_nested_chain() {
        let mut tree = TtyTree::new();
        let leaf = tree.ensure_path(&[1, 2, 3]);
        assert_eq!(leaf, TtyId(3));
        assert!(tree.exists(TtyId(1)));
        assert!(tree.exists(TtyId(2)));
        assert!(tree.exists(TtyId(3)));
    }

    #[test]
    fn repeated_path_reuses_nodes() {
        let mut tree = TtyTree::new();
        let a = tree.ensure_path(&[5]);
        let b = tree.ensure_path(&[5]);
        assert_eq!(a, b);
    }

    #[test]
    fn connections_ordered_by_priority_descending() {
        let mut tree = TtyTree::new();
        let tty = tree.ensure_path(&[1]);
        tree.add_connection(tty, conn(1), 10);
        tree.add_connection(tty, conn(2), 90);
        tree.add_connection(tty, conn(3), 50);
        assert_eq!(
            tree.connections_at(tty),
            vec![conn(2), conn(3), conn(1)]
        );
    }

    #[test]
    fn empty_leaf_is_garbage_collected_but_root_survives() {
        let mut tree = TtyTree::new();
        let tty = tree.ensure_path(&[7]);
        tree.add_connection(tty, conn(1), 50);
        tree.remove_connection(tty, conn(1));
        assert!(!tree.exists(tty));
        assert!(tree.exists(ROOT));
    }

    #[test]
    fn node_with_children_is_not_collected() {
        let mut tree = TtyTree::new();
        let parent = tree.ensure_path(&[1]);
        let child = tree.ensure_path(&[1, 2]);
        tree.add_connection(child, conn(1), 50);
        tree.remove_connection(parent, conn(2));
        assert!(tree.exists(parent));
    }

    #[test]
    fn focus_resolves_through_chain() {
        let mut tree = TtyTree::new();
        let a = tree.ensure_path(&[1]);
        let b = tree.ensure_path(&[1, 2]);
        tree.set_focus(a, Some(b));
        assert_eq!(tree.resolve_focus(a), b);
        assert_eq!(tree.resolve_focus(ROOT), ROOT);
    }
}
