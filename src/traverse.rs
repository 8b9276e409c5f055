use std::collections::VecDeque;

use tracing::error;

use crate::errors::{Error, Result};
use crate::library::{Library, NodeId};

/// Order in which [`Library::traverse`] reports collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// every collection at one reachability depth before any deeper one
    BreadthFirst,
    /// descendants before their ancestor
    DepthFirst,
}

impl Library {
    /// Every collection reachable from `start`, each exactly once, even when
    /// the graph shares nodes or contains cycles.
    ///
    /// Visited collections are marked while walking. A second walk clears the
    /// markers and counts them; if the counts differ, the graph was corrupted
    /// and [`Error::GraphConsistency`] is returned.
    pub fn traverse(&self, start: NodeId, order: Order, inclusive: bool) -> Result<Vec<NodeId>> {
        let mut marked = vec![false; self.nodes.len()];
        let visited = match order {
            Order::BreadthFirst => self.walk_breadth_first(start, &mut marked),
            Order::DepthFirst => self.walk_depth_first(start, &mut marked),
        };

        let cleared = self.clear_markers(start, &mut marked);
        if cleared != visited.len() || marked.iter().any(|m| *m) {
            error!(visited = visited.len(), cleared, "marker count mismatch after traversal");
            return Err(Error::GraphConsistency {
                visited: visited.len(),
                cleared,
            });
        }

        Ok(if inclusive {
            visited
        } else {
            visited.into_iter().filter(|n| *n != start).collect()
        })
    }

    /// `start` and everything below it, breadth-first
    pub(crate) fn reachable(&self, start: NodeId) -> Result<Vec<NodeId>> {
        self.traverse(start, Order::BreadthFirst, true)
    }

    fn walk_breadth_first(&self, start: NodeId, marked: &mut [bool]) -> Vec<NodeId> {
        let mut visited = Vec::new();
        let mut queue = VecDeque::from([start]);
        marked[start.0] = true;
        while let Some(node) = queue.pop_front() {
            visited.push(node);
            for child in &self.nodes[node.0].children {
                if !marked[child.0] {
                    marked[child.0] = true;
                    queue.push_back(*child);
                }
            }
        }
        visited
    }

    fn walk_depth_first(&self, start: NodeId, marked: &mut [bool]) -> Vec<NodeId> {
        let mut visited = Vec::new();
        // (collection, index of the next child to look at)
        let mut stack = vec![(start, 0usize)];
        marked[start.0] = true;
        while let Some(&(node, next)) = stack.last() {
            match self.nodes[node.0].children.get(next) {
                Some(child) => {
                    let top = stack.len() - 1;
                    stack[top].1 += 1;
                    if !marked[child.0] {
                        marked[child.0] = true;
                        stack.push((*child, 0));
                    }
                }
                None => {
                    visited.push(node);
                    stack.pop();
                }
            }
        }
        visited
    }

    fn clear_markers(&self, start: NodeId, marked: &mut [bool]) -> usize {
        let mut cleared = 0;
        let mut queue = VecDeque::new();
        if marked[start.0] {
            marked[start.0] = false;
            cleared += 1;
            queue.push_back(start);
        }
        while let Some(node) = queue.pop_front() {
            for child in &self.nodes[node.0].children {
                if marked[child.0] {
                    marked[child.0] = false;
                    cleared += 1;
                    queue.push_back(*child);
                }
            }
        }
        cleared
    }
}
