// Deadlock detection for the replicated engine.
//
// Builds a waits-for graph from every UP site's per-variable lock state and
// looks for a cycle, exactly as section 4.4 describes. Adapted from the
// single-process wait-for-graph detector this codebase already carried for
// its local (non-distributed) lock manager; the difference here is that
// edges are assembled from `Variable`'s lock state directly rather than from
// a separate add_wait/remove_wait table, since the variables themselves are
// the source of truth for who's waiting on whom.

use std::collections::{HashMap, HashSet};

use tracing::error;

use crate::common::TransactionId;
use crate::engine::data_manager::DataManager;
use crate::engine::transaction::Transaction;
use crate::engine::variable::LockMode;

pub struct DeadlockDetector;

impl DeadlockDetector {
    /// Section 4.4: assembles the waits-for graph across every UP site.
    pub fn build_graph(sites: &[DataManager]) -> HashMap<TransactionId, HashSet<TransactionId>> {
        let mut graph: HashMap<TransactionId, HashSet<TransactionId>> = HashMap::new();

        for site in sites {
            if !site.is_up() {
                continue;
            }
            for variable in site.variables() {
                let waitq = variable.waitq();
                if waitq.is_empty() || variable.lock_mode() == LockMode::None {
                    continue;
                }

                match variable.lock_mode() {
                    LockMode::Read => {
                        let readers = variable.readers();
                        for entry in waitq {
                            let blocked_by_readers = entry.mode == LockMode::Write
                                && !(readers.len() == 1 && readers.contains(&entry.tid));
                            if blocked_by_readers {
                                for reader in readers {
                                    if reader != &entry.tid {
                                        graph.entry(entry.tid.clone()).or_default().insert(reader.clone());
                                    }
                                }
                            }
                        }
                    }
                    LockMode::Write => {
                        if let Some(writer) = variable.writer() {
                            for entry in waitq {
                                if &entry.tid != writer {
                                    graph.entry(entry.tid.clone()).or_default().insert(writer.clone());
                                }
                            }
                        }
                    }
                    LockMode::None => {}
                }

                for i in 0..waitq.len() {
                    for j in (i + 1)..waitq.len() {
                        let a = &waitq[i];
                        let b = &waitq[j];
                        let conflicts = !(a.mode == LockMode::Read && b.mode == LockMode::Read);
                        if conflicts && a.tid != b.tid {
                            graph.entry(b.tid.clone()).or_default().insert(a.tid.clone());
                        }
                    }
                }
            }
        }

        graph
    }

    /// Depth-first search for any cycle, returning the transactions on it in
    /// path order. Iteration order over candidate start nodes and over each
    /// node's neighbors is sorted for deterministic results.
    pub fn find_cycle(
        graph: &HashMap<TransactionId, HashSet<TransactionId>>,
    ) -> Option<Vec<TransactionId>> {
        let mut nodes: Vec<&TransactionId> = graph.keys().collect();
        nodes.sort();

        let mut visited: HashSet<TransactionId> = HashSet::new();
        for start in nodes {
            if visited.contains(start) {
                continue;
            }
            let mut stack = Vec::new();
            let mut on_stack = HashSet::new();
            if let Some(cycle) = Self::dfs(start, graph, &mut visited, &mut stack, &mut on_stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        node: &TransactionId,
        graph: &HashMap<TransactionId, HashSet<TransactionId>>,
        visited: &mut HashSet<TransactionId>,
        stack: &mut Vec<TransactionId>,
        on_stack: &mut HashSet<TransactionId>,
    ) -> Option<Vec<TransactionId>> {
        visited.insert(node.clone());
        stack.push(node.clone());
        on_stack.insert(node.clone());

        if let Some(neighbors) = graph.get(node) {
            let mut sorted: Vec<&TransactionId> = neighbors.iter().collect();
            sorted.sort();
            for neighbor in sorted {
                if on_stack.contains(neighbor) {
                    let start = stack.iter().position(|n| n == neighbor).unwrap();
                    return Some(stack[start..].to_vec());
                }
                if !visited.contains(neighbor) {
                    if let Some(cycle) = Self::dfs(neighbor, graph, visited, stack, on_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        on_stack.remove(node);
        None
    }

    /// Section 4.4 victim selection: the youngest (largest `start_ts`)
    /// transaction on the cycle, tie-broken by the lexicographically larger
    /// tid.
    pub fn select_victim(
        cycle: &[TransactionId],
        txns: &HashMap<TransactionId, Transaction>,
    ) -> Option<TransactionId> {
        cycle
            .iter()
            .filter_map(|tid| txns.get(tid).map(|t| (t.start_ts, tid.clone())))
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, tid)| {
                error!(victim = %tid, cycle = ?cycle, "deadlock detected");
                tid
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_of(edges: &[(&str, &str)]) -> HashMap<TransactionId, HashSet<TransactionId>> {
        let mut g: HashMap<TransactionId, HashSet<TransactionId>> = HashMap::new();
        for (from, to) in edges {
            g.entry(from.to_string()).or_default().insert(to.to_string());
        }
        g
    }

    #[test]
    fn finds_simple_cycle() {
        let graph = graph_of(&[("T1", "T2"), ("T2", "T1")]);
        let cycle = DeadlockDetector::find_cycle(&graph).unwrap();
        assert!(cycle.contains(&"T1".to_string()));
        assert!(cycle.contains(&"T2".to_string()));
    }

    #[test]
    fn no_cycle_in_acyclic_graph() {
        let graph = graph_of(&[("T1", "T2"), ("T2", "T3")]);
        assert!(DeadlockDetector::find_cycle(&graph).is_none());
    }

    #[test]
    fn selects_youngest_as_victim() {
        let mut txns = HashMap::new();
        txns.insert("T1".to_string(), Transaction::new("T1", 1, false));
        txns.insert("T2".to_string(), Transaction::new("T2", 5, false));
        let cycle = vec!["T1".to_string(), "T2".to_string()];
        assert_eq!(
            DeadlockDetector::select_victim(&cycle, &txns),
            Some("T2".to_string())
        );
    }

    #[test]
    fn tie_breaks_on_larger_tid() {
        let mut txns = HashMap::new();
        txns.insert("T1".to_string(), Transaction::new("T1", 3, false));
        txns.insert("T9".to_string(), Transaction::new("T9", 3, false));
        let cycle = vec!["T1".to_string(), "T9".to_string()];
        assert_eq!(
            DeadlockDetector::select_victim(&cycle, &txns),
            Some("T9".to_string())
        );
    }
}
