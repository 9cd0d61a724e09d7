//! Parent-link graph checks used by bulk ingestion.
//!
//! The graph is arena-indexed (ids map to dense `usize` slots) and traversed
//! iteratively, so deep or adversarial hierarchies cannot exhaust the call
//! stack.

use std::collections::HashMap;

use orgflags_core::OrganizationId;

/// Outcome of validating a batch of organizations against the tree invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkValidation {
    Ok,
    /// The same organization was given two different parents.
    MultipleParents,
    /// Following parent links revisits a node.
    Cyclic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Parent → children adjacency over a set of `(child, parent)` links.
#[derive(Debug, Default)]
pub struct ParentGraph {
    index: HashMap<OrganizationId, usize>,
    children: Vec<Vec<usize>>,
}

impl ParentGraph {
    pub fn from_links<I>(links: I) -> Self
    where
        I: IntoIterator<Item = (OrganizationId, Option<OrganizationId>)>,
    {
        let mut graph = Self::default();
        for (child, parent) in links {
            let child_slot = graph.slot(child);
            if let Some(parent) = parent {
                let parent_slot = graph.slot(parent);
                graph.children[parent_slot].push(child_slot);
            }
        }
        graph
    }

    fn slot(&mut self, id: OrganizationId) -> usize {
        if let Some(&slot) = self.index.get(&id) {
            return slot;
        }
        let slot = self.children.len();
        self.index.insert(id, slot);
        self.children.push(Vec::new());
        slot
    }

    /// Three-color depth-first search with an explicit stack.
    ///
    /// Reaching a gray (on-stack) node means the links contain a directed
    /// cycle. Every node is used as a start, so cycles with no root above them
    /// are found too.
    pub fn has_cycle(&self) -> bool {
        let mut color = vec![Color::White; self.children.len()];
        // (node, index of the next child to visit)
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.children.len() {
            if color[start] != Color::White {
                continue;
            }
            color[start] = Color::Gray;
            stack.push((start, 0));

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                match self.children[node].get(frame.1).copied() {
                    Some(child) => {
                        frame.1 += 1;
                        match color[child] {
                            Color::Gray => return true,
                            Color::White => {
                                color[child] = Color::Gray;
                                stack.push((child, 0));
                            }
                            Color::Black => {}
                        }
                    }
                    None => {
                        color[node] = Color::Black;
                        stack.pop();
                    }
                }
            }
        }

        false
    }
}
