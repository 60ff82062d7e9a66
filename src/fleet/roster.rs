use crate::domain::NodeHandle;
use std::sync::Arc;

/// Name-ordered set of fleet nodes. Order is load-bearing: allocation
/// walks the roster front to back, so two controllers with the same
/// membership make the same decisions.
#[derive(Default)]
pub struct Roster {
    nodes: Vec<Arc<dyn NodeHandle>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping name order. Returns false when a node with the
    /// same name is already present; the existing entry wins.
    pub fn insert(&mut self, node: Arc<dyn NodeHandle>) -> bool {
        match self
            .nodes
            .binary_search_by(|held| held.name().cmp(node.name()))
        {
            Ok(_) => false,
            Err(pos) => {
                self.nodes.insert(pos, node);
                true
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.nodes.binary_search_by(|held| held.name().cmp(name)) {
            Ok(pos) => {
                self.nodes.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes
            .binary_search_by(|held| held.name().cmp(name))
            .is_ok()
    }

    pub fn nodes(&self) -> &[Arc<dyn NodeHandle>] {
        &self.nodes
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name().to_owned()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
